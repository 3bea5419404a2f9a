//! Shape checks applied to an event before it is written.
//!
//! [`validate`] either rejects the event or returns a sanitised copy with
//! undeclared parameters, disabled traces, and unrecognized claims removed.

use tracing::debug;

use crate::{
  catalog::{Catalog, ParamKind},
  error::ValidationError,
  event::{NewEvent, ParamValue},
};

pub fn validate(catalog: &Catalog, mut event: NewEvent) -> Result<NewEvent, ValidationError> {
  if event.event_name.trim().is_empty() {
    return Err(ValidationError::EmptyEventName);
  }

  for (name, value) in &event.params {
    if let ParamValue::Number(n) = value
      && !n.is_finite()
    {
      return Err(ValidationError::NonFiniteNumber(name.clone()));
    }
  }

  event.claims.retain(|name, _| {
    let keep = catalog.is_claim(name);
    if !keep {
      debug!(claim = %name, "dropping unrecognized claim");
    }
    keep
  });

  if catalog.is_free_form() {
    return Ok(event);
  }

  let definition = catalog
    .event_type(&event.event_name)
    .ok_or_else(|| ValidationError::UnknownEventType(event.event_name.clone()))?;

  let mut params = std::mem::take(&mut event.params);
  params.retain(|name, _| {
    let declared = definition.param(name).is_some();
    if !declared {
      debug!(event = %definition.event_type, param = %name, "dropping undeclared parameter");
    }
    declared
  });

  for (name, value) in &params {
    let Some(param) = definition.param(name) else { continue };
    let fits = matches!(
      (param.kind, value),
      (ParamKind::Numeric, ParamValue::Number(_)) | (ParamKind::String, ParamValue::Text(_))
    );
    if !fits {
      return Err(ValidationError::KindMismatch {
        event_type: definition.event_type.clone(),
        param:      name.clone(),
        expected:   param.kind.as_str(),
      });
    }
  }
  event.params = params;

  if !definition.trace_enabled && !event.traces.is_empty() {
    debug!(
      event = %definition.event_type,
      count = event.traces.len(),
      "dropping traces for event type without tracing"
    );
    event.traces.clear();
  }

  Ok(event)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::catalog::{CatalogConfig, EventTypeConfig, ParamEntry};

  fn catalog() -> Catalog {
    Catalog::load(&CatalogConfig {
      event_types: vec![
        EventTypeConfig {
          event_type: "purchase".into(),
          label:      None,
          trace:      false,
          params:     vec![
            ParamEntry::full("amount", ParamKind::Numeric),
            ParamEntry::full("sku", ParamKind::String),
          ],
        },
        EventTypeConfig {
          event_type: "crash".into(),
          label:      None,
          trace:      true,
          params:     vec![],
        },
      ],
      claims:      vec!["tenant".into()],
    })
    .unwrap()
  }

  #[test]
  fn keeps_declared_params_and_known_claims() {
    let event = NewEvent::new("purchase")
      .param("amount", 42)
      .param("sku", "A-1")
      .claim("tenant", "acme")
      .claim("email", "a@example.com");

    let clean = validate(&catalog(), event).unwrap();
    assert_eq!(clean.params.len(), 2);
    assert_eq!(clean.claims.len(), 1);
    assert_eq!(clean.claims["tenant"], "acme");
  }

  #[test]
  fn drops_undeclared_params_and_disabled_traces() {
    let event = NewEvent::new("purchase")
      .param("amount", 1)
      .param("coupon", "X")
      .trace(json!({ "step": 1 }));

    let clean = validate(&catalog(), event).unwrap();
    assert!(clean.params.contains_key("amount"));
    assert!(!clean.params.contains_key("coupon"));
    assert!(clean.traces.is_empty());
  }

  #[test]
  fn sanitising_keeps_submission_order() {
    let event = NewEvent::new("purchase")
      .param("sku", "A-1")
      .param("coupon", "X")
      .param("amount", 3);

    let clean = validate(&catalog(), event).unwrap();
    assert_eq!(clean.params.keys().collect::<Vec<_>>(), ["sku", "amount"]);
  }

  #[test]
  fn keeps_traces_when_enabled() {
    let event = NewEvent::new("crash").trace(json!({ "frame": "main" }));
    assert_eq!(validate(&catalog(), event).unwrap().traces.len(), 1);
  }

  #[test]
  fn rejects_bad_events() {
    let catalog = catalog();
    assert_eq!(validate(&catalog, NewEvent::new("  ")), Err(ValidationError::EmptyEventName));
    assert_eq!(
      validate(&catalog, NewEvent::new("signup")),
      Err(ValidationError::UnknownEventType("signup".into()))
    );
    assert!(matches!(
      validate(&catalog, NewEvent::new("purchase").param("amount", "lots")),
      Err(ValidationError::KindMismatch { expected: "numeric", .. })
    ));
    assert!(matches!(
      validate(&catalog, NewEvent::new("purchase").param("sku", 5)),
      Err(ValidationError::KindMismatch { expected: "string", .. })
    ));
    assert_eq!(
      validate(&catalog, NewEvent::new("purchase").param("amount", f64::NAN)),
      Err(ValidationError::NonFiniteNumber("amount".into()))
    );
  }

  #[test]
  fn free_form_keeps_everything_but_unknown_claims() {
    let catalog = Catalog::load(&CatalogConfig::default()).unwrap();
    let event = NewEvent::new("anything")
      .param("x", 1)
      .param("y", "z")
      .trace(json!([1, 2]))
      .claim("tenant", "acme");

    let clean = validate(&catalog, event).unwrap();
    assert_eq!(clean.params.len(), 2);
    assert_eq!(clean.traces.len(), 1);
    assert!(clean.claims.is_empty());
  }
}

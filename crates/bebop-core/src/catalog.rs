//! The schema registry: a typed vocabulary of event types, parameters, and
//! claim names built from operator configuration.
//!
//! [`Catalog::load`] is a pure function of [`CatalogConfig`]. A loaded catalog
//! is never mutated; [`CatalogHandle`] swaps in a whole new `Arc<Catalog>` on
//! reload so concurrent readers keep a consistent snapshot.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

// ─── Configuration input ─────────────────────────────────────────────────────

/// Operator-supplied catalog declarations, as deserialised from the server
/// configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
  #[serde(default)]
  pub event_types: Vec<EventTypeConfig>,
  /// Identity claim names captured from callers at ingestion time.
  #[serde(default)]
  pub claims:      Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeConfig {
  #[serde(rename = "type")]
  pub event_type: String,
  #[serde(default)]
  pub label:      Option<String>,
  /// Whether trace payloads are kept for this event type.
  #[serde(default)]
  pub trace:      bool,
  #[serde(default)]
  pub params:     Vec<ParamEntry>,
}

/// A parameter declaration.
///
/// Accepts either `{ name, kind, label }` or the compact `{ <name>: <kind> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamEntry {
  Full {
    name:  String,
    kind:  String,
    #[serde(default)]
    label: Option<String>,
  },
  Short(BTreeMap<String, String>),
}

impl ParamEntry {
  pub fn full(name: impl Into<String>, kind: ParamKind) -> Self {
    Self::Full { name: name.into(), kind: kind.as_str().to_owned(), label: None }
  }
}

// ─── Catalog model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
  Numeric,
  String,
}

impl ParamKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Numeric => "numeric",
      Self::String => "string",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "numeric" => Some(Self::Numeric),
      "string" => Some(Self::String),
      _ => None,
    }
  }
}

impl std::fmt::Display for ParamKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinition {
  pub name:  String,
  pub kind:  ParamKind,
  pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeDefinition {
  #[serde(rename = "type")]
  pub event_type:    String,
  pub label:         String,
  pub trace_enabled: bool,
  pub params:        Vec<ParameterDefinition>,
}

impl EventTypeDefinition {
  pub fn param(&self, name: &str) -> Option<&ParameterDefinition> {
    self.params.iter().find(|p| p.name == name)
  }
}

/// A parameter name seen across all event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatParameter {
  pub name:        String,
  /// Kind from the first event type that declared this name.
  pub kind:        ParamKind,
  pub label:       String,
  /// Every event type declaring a parameter with this name.
  pub event_types: Vec<String>,
}

/// Serializable introspection view handed to transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
  pub event_types: Vec<EventTypeDefinition>,
  pub parameters:  Vec<FlatParameter>,
  pub claim_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
  event_types: Vec<EventTypeDefinition>,
  by_type:     HashMap<String, usize>,
  flat_params: Vec<FlatParameter>,
  by_param:    HashMap<String, usize>,
  claim_names: Vec<String>,
}

impl Catalog {
  /// Build a catalog from configuration.
  pub fn load(config: &CatalogConfig) -> Result<Self, ConfigurationError> {
    let mut catalog = Self::default();

    for (index, et) in config.event_types.iter().enumerate() {
      if et.event_type.trim().is_empty() {
        return Err(ConfigurationError::EmptyEventType(index));
      }
      if catalog.by_type.contains_key(&et.event_type) {
        return Err(ConfigurationError::DuplicateEventType(et.event_type.clone()));
      }

      let params = load_params(et)?;
      for p in &params {
        catalog.add_flat_param(&et.event_type, p);
      }

      catalog.by_type.insert(et.event_type.clone(), catalog.event_types.len());
      catalog.event_types.push(EventTypeDefinition {
        event_type:    et.event_type.clone(),
        label:         et.label.clone().unwrap_or_else(|| et.event_type.clone()),
        trace_enabled: et.trace,
        params,
      });
    }

    let mut seen = HashSet::new();
    for (index, name) in config.claims.iter().enumerate() {
      if name.trim().is_empty() {
        return Err(ConfigurationError::EmptyClaimName(index));
      }
      if seen.insert(name.as_str()) {
        catalog.claim_names.push(name.clone());
      }
    }

    Ok(catalog)
  }

  fn add_flat_param(&mut self, event_type: &str, p: &ParameterDefinition) {
    match self.by_param.get(&p.name) {
      Some(&i) => self.flat_params[i].event_types.push(event_type.to_owned()),
      None => {
        self.by_param.insert(p.name.clone(), self.flat_params.len());
        self.flat_params.push(FlatParameter {
          name:        p.name.clone(),
          kind:        p.kind,
          label:       p.label.clone(),
          event_types: vec![event_type.to_owned()],
        });
      }
    }
  }

  pub fn event_types(&self) -> &[EventTypeDefinition] { &self.event_types }

  pub fn event_type(&self, name: &str) -> Option<&EventTypeDefinition> {
    self.by_type.get(name).map(|&i| &self.event_types[i])
  }

  pub fn param_kind(&self, event_type: &str, param: &str) -> Option<ParamKind> {
    self.event_type(event_type)?.param(param).map(|p| p.kind)
  }

  pub fn flat_params(&self) -> &[FlatParameter] { &self.flat_params }

  pub fn flat_param(&self, name: &str) -> Option<&FlatParameter> {
    self.by_param.get(name).map(|&i| &self.flat_params[i])
  }

  pub fn claim_names(&self) -> &[String] { &self.claim_names }

  pub fn is_claim(&self, name: &str) -> bool {
    self.claim_names.iter().any(|c| c == name)
  }

  /// `true` when no event types are configured and any event name is
  /// accepted.
  pub fn is_free_form(&self) -> bool { self.event_types.is_empty() }

  pub fn snapshot(&self) -> CatalogSnapshot {
    CatalogSnapshot {
      event_types: self.event_types.clone(),
      parameters:  self.flat_params.clone(),
      claim_names: self.claim_names.clone(),
    }
  }
}

fn load_params(et: &EventTypeConfig) -> Result<Vec<ParameterDefinition>, ConfigurationError> {
  let malformed = |index: usize, reason: &str| ConfigurationError::MalformedParameter {
    event_type: et.event_type.clone(),
    index,
    reason: reason.to_owned(),
  };

  let mut params: Vec<ParameterDefinition> = Vec::with_capacity(et.params.len());
  for (index, entry) in et.params.iter().enumerate() {
    let (name, kind, label) = match entry {
      ParamEntry::Full { name, kind, label } => (name, kind, label.as_ref()),
      ParamEntry::Short(map) => {
        let mut entries = map.iter();
        match (entries.next(), entries.next()) {
          (Some((name, kind)), None) => (name, kind, None),
          (None, _) => return Err(malformed(index, "empty entry")),
          (Some(_), Some(_)) => {
            return Err(malformed(index, "expected exactly one `name: kind` pair"));
          }
        }
      }
    };

    if name.trim().is_empty() {
      return Err(malformed(index, "empty parameter name"));
    }
    let kind = ParamKind::parse(kind).ok_or_else(|| ConfigurationError::UnknownParameterKind {
      event_type: et.event_type.clone(),
      param:      name.clone(),
      kind:       kind.clone(),
    })?;
    if params.iter().any(|p| &p.name == name) {
      return Err(ConfigurationError::DuplicateParameter {
        event_type: et.event_type.clone(),
        param:      name.clone(),
      });
    }

    params.push(ParameterDefinition {
      name: name.clone(),
      kind,
      label: label.cloned().unwrap_or_else(|| name.clone()),
    });
  }
  Ok(params)
}

// ─── Shared handle ───────────────────────────────────────────────────────────

/// Holds the current catalog snapshot.
///
/// Cloning is cheap; all clones observe the same snapshot. [`replace`]
/// swaps the whole `Arc` so readers holding the old one are unaffected.
///
/// [`replace`]: CatalogHandle::replace
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
  current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
  pub fn new(catalog: Catalog) -> Self {
    Self { current: Arc::new(RwLock::new(Arc::new(catalog))) }
  }

  pub fn current(&self) -> Arc<Catalog> {
    Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
  }

  /// Install `catalog` and return the previous snapshot.
  pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
    let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, Arc::new(catalog))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event_type(name: &str, params: Vec<ParamEntry>) -> EventTypeConfig {
    EventTypeConfig {
      event_type: name.into(),
      label: None,
      trace: false,
      params,
    }
  }

  fn short(name: &str, kind: &str) -> ParamEntry {
    ParamEntry::Short(BTreeMap::from([(name.to_owned(), kind.to_owned())]))
  }

  #[test]
  fn loads_types_params_and_claims() {
    let config = CatalogConfig {
      event_types: vec![
        EventTypeConfig {
          event_type: "purchase".into(),
          label:      Some("Purchase".into()),
          trace:      true,
          params:     vec![
            ParamEntry::Full {
              name:  "amount".into(),
              kind:  "numeric".into(),
              label: Some("Amount".into()),
            },
            short("sku", "string"),
          ],
        },
        event_type("login", vec![]),
      ],
      claims:      vec!["tenant".into(), "email".into(), "tenant".into()],
    };

    let catalog = Catalog::load(&config).unwrap();
    assert_eq!(catalog.event_types().len(), 2);
    let purchase = catalog.event_type("purchase").unwrap();
    assert_eq!(purchase.label, "Purchase");
    assert!(purchase.trace_enabled);
    assert_eq!(catalog.param_kind("purchase", "amount"), Some(ParamKind::Numeric));
    assert_eq!(catalog.param_kind("purchase", "sku"), Some(ParamKind::String));
    assert_eq!(catalog.param_kind("purchase", "missing"), None);
    assert_eq!(catalog.event_type("login").unwrap().label, "login");
    assert_eq!(catalog.claim_names(), &["tenant", "email"]);
    assert!(!catalog.is_free_form());
  }

  #[test]
  fn flattened_params_keep_the_first_kind() {
    let config = CatalogConfig {
      event_types: vec![
        event_type("a", vec![short("value", "numeric")]),
        event_type("b", vec![short("value", "string"), short("other", "string")]),
      ],
      claims:      vec![],
    };

    let catalog = Catalog::load(&config).unwrap();
    let value = catalog.flat_param("value").unwrap();
    assert_eq!(value.kind, ParamKind::Numeric);
    assert_eq!(value.event_types, vec!["a", "b"]);
    assert_eq!(catalog.flat_params().len(), 2);
    // The per-type view is unaffected by the flattening.
    assert_eq!(catalog.param_kind("b", "value"), Some(ParamKind::String));
  }

  #[test]
  fn rejects_unknown_kind() {
    let config = CatalogConfig {
      event_types: vec![event_type("a", vec![short("x", "boolean")])],
      claims:      vec![],
    };
    assert!(matches!(
      Catalog::load(&config),
      Err(ConfigurationError::UnknownParameterKind { ref kind, .. }) if kind == "boolean"
    ));
  }

  #[test]
  fn rejects_malformed_short_entries() {
    let two = ParamEntry::Short(BTreeMap::from([
      ("x".to_owned(), "string".to_owned()),
      ("y".to_owned(), "string".to_owned()),
    ]));
    let config = CatalogConfig {
      event_types: vec![event_type("a", vec![two])],
      claims:      vec![],
    };
    assert!(matches!(
      Catalog::load(&config),
      Err(ConfigurationError::MalformedParameter { index: 0, .. })
    ));

    let empty = CatalogConfig {
      event_types: vec![event_type("a", vec![ParamEntry::Short(BTreeMap::new())])],
      claims:      vec![],
    };
    assert!(matches!(
      Catalog::load(&empty),
      Err(ConfigurationError::MalformedParameter { .. })
    ));
  }

  #[test]
  fn rejects_duplicates_and_empty_names() {
    let dup_type = CatalogConfig {
      event_types: vec![event_type("a", vec![]), event_type("a", vec![])],
      claims:      vec![],
    };
    assert_eq!(
      Catalog::load(&dup_type).unwrap_err(),
      ConfigurationError::DuplicateEventType("a".into())
    );

    let dup_param = CatalogConfig {
      event_types: vec![event_type("a", vec![short("x", "string"), short("x", "numeric")])],
      claims:      vec![],
    };
    assert!(matches!(
      Catalog::load(&dup_param),
      Err(ConfigurationError::DuplicateParameter { .. })
    ));

    let empty_type = CatalogConfig {
      event_types: vec![event_type(" ", vec![])],
      claims:      vec![],
    };
    assert_eq!(
      Catalog::load(&empty_type).unwrap_err(),
      ConfigurationError::EmptyEventType(0)
    );

    let empty_claim = CatalogConfig { event_types: vec![], claims: vec!["".into()] };
    assert_eq!(
      Catalog::load(&empty_claim).unwrap_err(),
      ConfigurationError::EmptyClaimName(0)
    );
  }

  #[test]
  fn deserializes_both_param_shapes() {
    let config: CatalogConfig = serde_json::from_str(
      r#"{
        "event_types": [
          { "type": "purchase", "trace": true,
            "params": [ { "amount": "numeric" }, { "name": "sku", "kind": "string", "label": "SKU" } ] }
        ],
        "claims": ["tenant"]
      }"#,
    )
    .unwrap();

    let catalog = Catalog::load(&config).unwrap();
    let purchase = catalog.event_type("purchase").unwrap();
    assert_eq!(purchase.params[0].name, "amount");
    assert_eq!(purchase.params[1].label, "SKU");
  }

  #[test]
  fn handle_replacement_leaves_old_snapshot_intact() {
    let handle = CatalogHandle::new(Catalog::default());
    let before = handle.current();
    assert!(before.is_free_form());

    let config = CatalogConfig {
      event_types: vec![event_type("a", vec![])],
      claims:      vec![],
    };
    let previous = handle.replace(Catalog::load(&config).unwrap());

    assert!(previous.is_free_form());
    assert!(before.is_free_form());
    assert!(handle.current().event_type("a").is_some());
  }
}

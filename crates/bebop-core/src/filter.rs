//! Structured filter expressions accepted by [`EventService::query`] and the
//! change feed.
//!
//! A filter is a set of optional condition categories that are ANDed
//! together, plus `and` / `or` / `not` sub-filters for nesting. The JSON form
//! is camelCase:
//!
//! ```json
//! {
//!   "eventName":  { "in": ["purchase", "refund"] },
//!   "createdAt":  { "gte": 1718000000000 },
//!   "claims":     { "tenant": { "eq": "acme" } },
//!   "params":     { "purchase": { "amount": { "gte": 40 } } },
//!   "paramsFlat": { "sku": { "in": ["A-1", "A-2"] } },
//!   "or":         [ { "eventType": { "eq": "login" } } ]
//! }
//! ```
//!
//! Filters are compiled against a [`Catalog`](crate::catalog::Catalog) by
//! [`predicate::compile`](crate::predicate::compile).
//!
//! [`EventService::query`]: crate::service::EventService::query

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::ParamValue;

// ─── Conditions ──────────────────────────────────────────────────────────────

/// Condition on the raw event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq:  Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neq: Option<String>,
  #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
  pub in_: Option<Vec<String>>,
}

/// Condition on the event type. The event type is the event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq: Option<String>,
}

/// Condition on creation time, in Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq:  Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neq: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gte: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lte: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq:  Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neq: Option<String>,
}

impl ClaimCondition {
  pub fn eq(value: impl Into<String>) -> Self {
    Self { eq: Some(value.into()), ..Self::default() }
  }

  pub fn neq(value: impl Into<String>) -> Self {
    Self { neq: Some(value.into()), ..Self::default() }
  }
}

/// Condition on one parameter of a specific event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq:  Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neq: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gte: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lte: Option<ParamValue>,
}

impl ParamCondition {
  pub fn eq(value: impl Into<ParamValue>) -> Self {
    Self { eq: Some(value.into()), ..Self::default() }
  }

  pub fn neq(value: impl Into<ParamValue>) -> Self {
    Self { neq: Some(value.into()), ..Self::default() }
  }

  pub fn gte(value: impl Into<ParamValue>) -> Self {
    Self { gte: Some(value.into()), ..Self::default() }
  }

  pub fn lte(value: impl Into<ParamValue>) -> Self {
    Self { lte: Some(value.into()), ..Self::default() }
  }

  pub fn is_empty(&self) -> bool {
    self.eq.is_none() && self.neq.is_none() && self.gte.is_none() && self.lte.is_none()
  }
}

/// Condition on a parameter by name alone, across all event types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlatParamCondition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub eq:  Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neq: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gte: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lte: Option<ParamValue>,
  /// String membership on the stored value.
  #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
  pub in_: Option<Vec<String>>,
}

impl FlatParamCondition {
  pub fn is_empty(&self) -> bool {
    self.eq.is_none()
      && self.neq.is_none()
      && self.gte.is_none()
      && self.lte.is_none()
      && self.in_.is_none()
  }
}

impl From<ParamCondition> for FlatParamCondition {
  fn from(c: ParamCondition) -> Self {
    Self { eq: c.eq, neq: c.neq, gte: c.gte, lte: c.lte, in_: None }
  }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventFilter {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_name:  Option<NameCondition>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_type:  Option<TypeCondition>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at:  Option<TimeCondition>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub claims:      BTreeMap<String, ClaimCondition>,
  /// Event type → parameter name → condition.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub params:      BTreeMap<String, BTreeMap<String, ParamCondition>>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub params_flat: BTreeMap<String, FlatParamCondition>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub and:         Vec<EventFilter>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub or:          Vec<EventFilter>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub not:         Option<Box<EventFilter>>,
}

impl EventFilter {
  /// Matches every event.
  pub fn all() -> Self { Self::default() }

  pub fn event_name(name: impl Into<String>) -> Self {
    Self {
      event_name: Some(NameCondition { eq: Some(name.into()), ..NameCondition::default() }),
      ..Self::default()
    }
  }

  pub fn event_name_in<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      event_name: Some(NameCondition {
        in_: Some(names.into_iter().map(Into::into).collect()),
        ..NameCondition::default()
      }),
      ..Self::default()
    }
  }

  pub fn with_claim(mut self, name: impl Into<String>, condition: ClaimCondition) -> Self {
    self.claims.insert(name.into(), condition);
    self
  }

  pub fn with_param(
    mut self,
    event_type: impl Into<String>,
    name: impl Into<String>,
    condition: ParamCondition,
  ) -> Self {
    self
      .params
      .entry(event_type.into())
      .or_default()
      .insert(name.into(), condition);
    self
  }

  pub fn with_flat_param(
    mut self,
    name: impl Into<String>,
    condition: impl Into<FlatParamCondition>,
  ) -> Self {
    self.params_flat.insert(name.into(), condition.into());
    self
  }

  pub fn with_created_at(mut self, condition: TimeCondition) -> Self {
    self.created_at = Some(condition);
    self
  }

  pub fn or(filters: Vec<EventFilter>) -> Self { Self { or: filters, ..Self::default() } }

  pub fn negate(filter: EventFilter) -> Self {
    Self { not: Some(Box::new(filter)), ..Self::default() }
  }
}

//! Event records, the unit of the Bebop store.
//!
//! An event is written once together with its parameters, traces, and claims,
//! and is never updated afterwards. Parameter values are always stored as
//! text; numeric values go through [`ParamValue::to_stored_text`] so that the
//! stored form parses back to the identical number.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;

// ─── Parameter values ────────────────────────────────────────────────────────

/// A parameter value as submitted by a client: a JSON number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Number(f64),
  Text(String),
}

impl ParamValue {
  /// The canonical text form written to the store.
  ///
  /// Numbers use the shortest representation that round-trips through
  /// `f64::from_str` (`42.0` becomes `"42"`).
  pub fn to_stored_text(&self) -> String {
    match self {
      Self::Number(n) => number_to_text(*n),
      Self::Text(s) => s.clone(),
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      Self::Text(s) => s.trim().parse().ok(),
    }
  }
}

impl From<f64> for ParamValue {
  fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<i32> for ParamValue {
  fn from(n: i32) -> Self { Self::Number(n.into()) }
}

impl From<i64> for ParamValue {
  fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl From<&str> for ParamValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for ParamValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

pub fn number_to_text(n: f64) -> String {
  // Normalise negative zero so "-0" and "0" never both appear in the store.
  if n == 0.0 { "0".to_owned() } else { n.to_string() }
}

// ─── Write model ─────────────────────────────────────────────────────────────

/// An event as submitted for ingestion.
///
/// `params` keeps submission order; setting a name twice keeps its first
/// position. `claims` holds the caller's already-verified identity claims; the ingest
/// path filters them down to the recognized claim names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
  pub event_name: String,
  #[serde(default)]
  pub params:     IndexMap<String, ParamValue>,
  #[serde(default)]
  pub traces:     Vec<serde_json::Value>,
  #[serde(default)]
  pub claims:     BTreeMap<String, String>,
}

impl NewEvent {
  pub fn new(event_name: impl Into<String>) -> Self {
    Self { event_name: event_name.into(), ..Self::default() }
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  pub fn trace(mut self, data: serde_json::Value) -> Self {
    self.traces.push(data);
    self
  }

  pub fn claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.claims.insert(name.into(), value.into());
    self
  }
}

// ─── Read model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParameter {
  pub event_id:    EventId,
  pub param_name:  String,
  pub param_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrace {
  pub event_id:   EventId,
  pub trace_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventClaim {
  pub event_id:    EventId,
  pub claim_name:  String,
  pub claim_value: String,
}

/// A stored event with all of its child records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
  pub id:         EventId,
  /// Store-assigned insertion sequence; strictly increasing.
  pub seq:        i64,
  pub event_name: String,
  pub created_at: DateTime<Utc>,
  pub params:     Vec<EventParameter>,
  pub traces:     Vec<EventTrace>,
  pub claims:     Vec<EventClaim>,
}

impl Event {
  pub fn param(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|p| p.param_name == name)
      .map(|p| p.param_value.as_str())
  }

  pub fn claim(&self, name: &str) -> Option<&str> {
    self
      .claims
      .iter()
      .find(|c| c.claim_name == name)
      .map(|c| c.claim_value.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn integral_numbers_have_no_fraction() {
    assert_eq!(ParamValue::Number(42.0).to_stored_text(), "42");
    assert_eq!(ParamValue::Number(-7.0).to_stored_text(), "-7");
    assert_eq!(ParamValue::Number(-0.0).to_stored_text(), "0");
  }

  #[test]
  fn stored_text_parses_back_to_the_same_number() {
    for n in [0.1, 1.0 / 3.0, 1e21, 123456.789, -2.5e-8, f64::MAX] {
      let text = number_to_text(n);
      let back: f64 = text.parse().unwrap();
      assert_eq!(back, n, "{text}");
    }
  }

  #[test]
  fn untagged_param_values_deserialize() {
    let v: BTreeMap<String, ParamValue> =
      serde_json::from_str(r#"{"amount": 42, "sku": "A-1"}"#).unwrap();
    assert_eq!(v["amount"], ParamValue::Number(42.0));
    assert_eq!(v["sku"], ParamValue::Text("A-1".into()));
  }
}

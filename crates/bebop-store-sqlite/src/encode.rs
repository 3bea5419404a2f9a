//! Encoding and decoding helpers between Rust domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as Unix milliseconds. Trace payloads are stored as
//! compact JSON. UUIDs are stored as hyphenated lowercase strings.

use bebop_core::event::{Event, EventClaim, EventParameter, EventTrace};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_ms(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_ms(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or_else(|| Error::DateParse(format!("timestamp out of range: {ms}")))
}

// ─── Traces ───────────────────────────────────────────────────────────────────

pub fn encode_trace(data: &serde_json::Value) -> Result<String> { Ok(serde_json::to_string(data)?) }

// ─── Raw row types ────────────────────────────────────────────────────────────

/// One `events` row plus its children, exactly as read from SQLite.
pub struct RawEvent {
  pub seq:        i64,
  pub event_id:   String,
  pub event_name: String,
  pub created_at: i64,
  pub params:     Vec<(String, String)>,
  pub traces:     Vec<String>,
  pub claims:     Vec<(String, String)>,
}

impl RawEvent {
  pub fn into_event(self) -> Result<Event> {
    let id = decode_uuid(&self.event_id)?;
    Ok(Event {
      id,
      seq: self.seq,
      event_name: self.event_name,
      created_at: decode_ms(self.created_at)?,
      params: self
        .params
        .into_iter()
        .map(|(param_name, param_value)| EventParameter { event_id: id, param_name, param_value })
        .collect(),
      traces: self
        .traces
        .iter()
        .map(|t| -> Result<EventTrace> {
          Ok(EventTrace { event_id: id, trace_data: serde_json::from_str(t)? })
        })
        .collect::<Result<_>>()?,
      claims: self
        .claims
        .into_iter()
        .map(|(claim_name, claim_value)| EventClaim { event_id: id, claim_name, claim_value })
        .collect(),
    })
  }
}

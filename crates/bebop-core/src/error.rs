//! Error types for `bebop-core`.
//!
//! Each failure class has its own enum so callers can tell a bad
//! configuration (fatal at load) from a bad request (per-call) from a storage
//! failure. [`Error`] wraps all of them for the [`EventService`] surface.
//!
//! [`EventService`]: crate::service::EventService

use thiserror::Error;

/// Malformed catalog input. Surfaced to the operator at load time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
  #[error("event type at index {0} has an empty `type`")]
  EmptyEventType(usize),

  #[error("event type {0:?} is declared more than once")]
  DuplicateEventType(String),

  #[error("event type {event_type:?}: malformed parameter entry at index {index}: {reason}")]
  MalformedParameter {
    event_type: String,
    index:      usize,
    reason:     String,
  },

  #[error("event type {event_type:?}: parameter {param:?} is declared more than once")]
  DuplicateParameter { event_type: String, param: String },

  #[error(
    "event type {event_type:?}: parameter {param:?} has unknown kind {kind:?} (expected `numeric` or `string`)"
  )]
  UnknownParameterKind {
    event_type: String,
    param:      String,
    kind:       String,
  },

  #[error("claim name at index {0} is empty")]
  EmptyClaimName(usize),
}

/// A rejected ingest payload. The store is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("event name must not be empty")]
  EmptyEventName,

  #[error("unknown event type: {0:?}")]
  UnknownEventType(String),

  #[error("parameter {param:?} of {event_type:?} expects a {expected} value")]
  KindMismatch {
    event_type: String,
    param:      String,
    expected:   &'static str,
  },

  #[error("parameter {0:?} is not a finite number")]
  NonFiniteNumber(String),
}

/// A malformed filter expression. Detected before any store access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  #[error("condition on {0} sets no operator")]
  EmptyCondition(String),

  #[error("`{op}` on {field} requires a numeric operand")]
  NonNumericOperand { field: String, op: &'static str },

  #[error("`in` on {0} requires at least one value")]
  EmptyInList(String),

  #[error("filter nesting exceeds {0} levels")]
  TooDeep(usize),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigurationError),

  #[error("validation error: {0}")]
  Validation(#[from] ValidationError),

  #[error("query error: {0}")]
  Query(#[from] QueryError),

  #[error("persistence error: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

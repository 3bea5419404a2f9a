//! The `EventStore` trait and supporting paging types.
//!
//! The trait is implemented by storage backends (e.g. `bebop-store-sqlite`).
//! The service, the change feed, and the HTTP layer depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  event::{Event, EventId, NewEvent},
  predicate::Predicate,
};

// ─── Paging ──────────────────────────────────────────────────────────────────

/// Sort direction on `(created_at, seq)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub limit:  usize,
  pub offset: usize,
}

impl Page {
  pub fn new(limit: usize, offset: usize) -> Self { Self { limit, offset } }
}

/// One page of query results.
///
/// `total` is the number of matching events ignoring `limit` and `offset`,
/// counted in the same read as `events`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
  pub events: Vec<Event>,
  pub total:  u64,
}

/// A position in the event log.
///
/// Events are totally ordered by `(created_at, seq)`; a watermark names the
/// last position a reader has consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark {
  /// Unix milliseconds.
  pub created_at: i64,
  pub seq:        i64,
}

impl Watermark {
  /// Before every stored event.
  pub fn origin() -> Self { Self::default() }

  /// Before every event created at or after `time`.
  pub fn at(time: DateTime<Utc>) -> Self {
    Self { created_at: time.timestamp_millis(), seq: 0 }
  }

  pub fn of(event: &Event) -> Self {
    Self { created_at: event.created_at.timestamp_millis(), seq: event.seq }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Bebop event store backend.
///
/// Events are append-only: once `insert_event` returns, the event and all of
/// its child records are visible to readers and never change.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EventStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist an event with its params, traces, and claims atomically.
  ///
  /// The store assigns `created_at`, never earlier than the latest stored
  /// event, so creation order and commit order agree.
  fn insert_event(
    &self,
    event: NewEvent,
  ) -> impl Future<Output = Result<EventId, Self::Error>> + Send + '_;

  /// Return one page of events matching `predicate`, with the total count.
  fn query(
    &self,
    predicate: Predicate,
    order: Order,
    page: Page,
  ) -> impl Future<Output = Result<EventPage, Self::Error>> + Send + '_;

  /// Events strictly after `after` in `(created_at, seq)` order, oldest
  /// first, at most `limit` of them.
  fn events_created_after(
    &self,
    after: Watermark,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  /// Position of the newest stored event, or `None` when the store is empty.
  fn latest_watermark(
    &self,
  ) -> impl Future<Output = Result<Option<Watermark>, Self::Error>> + Send + '_;
}

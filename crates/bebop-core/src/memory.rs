//! In-memory [`EventStore`] for exercising the service and the change feed
//! without a database.

use std::sync::{
  Mutex, PoisonError,
  atomic::{AtomicUsize, Ordering},
};

use chrono::{TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  event::{Event, EventClaim, EventId, EventParameter, EventTrace, NewEvent},
  predicate::Predicate,
  store::{EventPage, EventStore, Order, Page, Watermark},
};

#[derive(Debug, Error)]
#[error("injected read failure")]
pub struct MemoryError;

#[derive(Debug, Default)]
pub struct MemoryStore {
  events:        Mutex<Vec<Event>>,
  failing_reads: AtomicUsize,
}

impl MemoryStore {
  /// Make the next `n` reads fail with [`MemoryError`].
  pub fn fail_next_reads(&self, n: usize) { self.failing_reads.store(n, Ordering::SeqCst); }

  fn read_fails(&self) -> bool {
    self
      .failing_reads
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }

  fn events(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
    self.events.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl EventStore for MemoryStore {
  type Error = MemoryError;

  async fn insert_event(&self, input: NewEvent) -> Result<EventId, MemoryError> {
    let mut events = self.events();
    let id = Uuid::new_v4();
    let seq = events.len() as i64 + 1;
    let latest = events.last().map(|e| e.created_at);
    let now = Utc::now();
    let created_at = latest.map_or(now, |l| l.max(now));
    // Millisecond resolution, as in the persistent stores.
    let created_at = Utc
      .timestamp_millis_opt(created_at.timestamp_millis())
      .single()
      .unwrap_or(now);

    events.push(Event {
      id,
      seq,
      event_name: input.event_name,
      created_at,
      params: input
        .params
        .into_iter()
        .map(|(name, value)| EventParameter {
          event_id:    id,
          param_name:  name,
          param_value: value.to_stored_text(),
        })
        .collect(),
      traces: input
        .traces
        .into_iter()
        .map(|trace_data| EventTrace { event_id: id, trace_data })
        .collect(),
      claims: input
        .claims
        .into_iter()
        .map(|(name, value)| EventClaim { event_id: id, claim_name: name, claim_value: value })
        .collect(),
    });
    Ok(id)
  }

  async fn query(&self, predicate: Predicate, order: Order, page: Page) -> Result<EventPage, MemoryError> {
    if self.read_fails() {
      return Err(MemoryError);
    }
    let mut matched: Vec<Event> = self
      .events()
      .iter()
      .filter(|e| predicate.matches(e))
      .cloned()
      .collect();
    if order == Order::Desc {
      matched.reverse();
    }
    let total = matched.len() as u64;
    let events = matched.into_iter().skip(page.offset).take(page.limit).collect();
    Ok(EventPage { events, total })
  }

  async fn events_created_after(&self, after: Watermark, limit: usize) -> Result<Vec<Event>, MemoryError> {
    if self.read_fails() {
      return Err(MemoryError);
    }
    Ok(
      self
        .events()
        .iter()
        .filter(|e| Watermark::of(e) > after)
        .take(limit)
        .cloned()
        .collect(),
    )
  }

  async fn latest_watermark(&self) -> Result<Option<Watermark>, MemoryError> {
    Ok(self.events().last().map(Watermark::of))
  }
}

//! [`SqliteStore`]: the SQLite implementation of [`EventStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, types::Value};
use tracing::debug;
use uuid::Uuid;

use bebop_core::{
  event::{Event, EventId, NewEvent},
  predicate::Predicate,
  store::{EventPage, EventStore, Order, Page, Watermark},
};

use crate::{
  Result,
  encode::{RawEvent, encode_ms, encode_trace, encode_uuid},
  schema::SCHEMA,
  sql,
};

const EVENT_COLUMNS: &str = "e.seq, e.event_id, e.event_name, e.created_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Bebop event store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All clones
/// share one connection, so writes are serialised and commit in `seq` order.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run raw SQL against the connection. Tests use this to inject faults.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  #[cfg(test)]
  pub(crate) async fn count_rows(&self, table: &'static str) -> Result<i64> {
    Ok(
      self
        .conn
        .call(move |conn| Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?))
        .await?,
    )
  }
}

// ─── Row loading ─────────────────────────────────────────────────────────────

/// Run an `events` select and attach every event's children.
fn load_events(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> rusqlite::Result<Vec<RawEvent>> {
  let mut stmt = conn.prepare(sql)?;
  let mut events = stmt
    .query_map(rusqlite::params_from_iter(params), |row| {
      Ok(RawEvent {
        seq:        row.get(0)?,
        event_id:   row.get(1)?,
        event_name: row.get(2)?,
        created_at: row.get(3)?,
        params:     Vec::new(),
        traces:     Vec::new(),
        claims:     Vec::new(),
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut params_stmt = conn.prepare_cached(
    "SELECT param_name, param_value FROM event_params WHERE event_id = ?1 ORDER BY position",
  )?;
  let mut traces_stmt =
    conn.prepare_cached("SELECT trace_data FROM event_traces WHERE event_id = ?1 ORDER BY position")?;
  let mut claims_stmt = conn.prepare_cached(
    "SELECT claim_name, claim_value FROM event_claims WHERE event_id = ?1 ORDER BY position",
  )?;

  for event in &mut events {
    event.params = params_stmt
      .query_map([&event.event_id], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?;
    event.traces = traces_stmt
      .query_map([&event.event_id], |row| row.get(0))?
      .collect::<rusqlite::Result<_>>()?;
    event.claims = claims_stmt
      .query_map([&event.event_id], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<_>>()?;
  }

  Ok(events)
}

fn order_sql(order: Order) -> &'static str {
  match order {
    Order::Asc => "ASC",
    Order::Desc => "DESC",
  }
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
  type Error = crate::Error;

  async fn insert_event(&self, event: NewEvent) -> Result<EventId> {
    let id          = Uuid::new_v4();
    let id_str      = encode_uuid(id);
    let now_ms      = encode_ms(Utc::now());
    let event_name  = event.event_name;
    let params: Vec<(String, String)> = event
      .params
      .into_iter()
      .map(|(name, value)| (name, value.to_stored_text()))
      .collect();
    let traces = event.traces.iter().map(encode_trace).collect::<Result<Vec<_>>>()?;
    let claims: Vec<(String, String)> = event.claims.into_iter().collect();

    let created_at = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // Never earlier than the newest event, so creation order follows
        // commit order even if the wall clock steps backwards.
        let latest: Option<i64> = tx.query_row("SELECT MAX(created_at) FROM events", [], |r| r.get(0))?;
        let created_at = latest.map_or(now_ms, |l| l.max(now_ms));

        tx.execute(
          "INSERT INTO events (event_id, event_name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, event_name, created_at],
        )?;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO event_params (event_id, position, param_name, param_value)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (position, (name, value)) in params.iter().enumerate() {
            stmt.execute(rusqlite::params![id_str, position as i64, name, value])?;
          }

          let mut stmt = tx.prepare_cached(
            "INSERT INTO event_traces (event_id, position, trace_data) VALUES (?1, ?2, ?3)",
          )?;
          for (position, data) in traces.iter().enumerate() {
            stmt.execute(rusqlite::params![id_str, position as i64, data])?;
          }

          let mut stmt = tx.prepare_cached(
            "INSERT INTO event_claims (event_id, position, claim_name, claim_value)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (position, (name, value)) in claims.iter().enumerate() {
            stmt.execute(rusqlite::params![id_str, position as i64, name, value])?;
          }
        }
        tx.commit()?;
        Ok(created_at)
      })
      .await?;

    debug!(%id, created_at, "event stored");
    Ok(id)
  }

  async fn query(&self, predicate: Predicate, order: Order, page: Page) -> Result<EventPage> {
    let clause = sql::lower(&predicate);
    let order = order_sql(order);
    let limit = i64::try_from(page.limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

    let (total, raws): (i64, Vec<RawEvent>) = self
      .conn
      .call(move |conn| {
        // Count and page from one snapshot.
        let tx = conn.transaction()?;
        let total = tx.query_row(
          &format!("SELECT COUNT(*) FROM events e WHERE {}", clause.sql),
          rusqlite::params_from_iter(&clause.params),
          |r| r.get(0),
        )?;

        let raws = if limit == 0 {
          Vec::new()
        } else {
          let mut params = clause.params;
          params.push(Value::Integer(limit));
          params.push(Value::Integer(offset));
          load_events(
            &tx,
            &format!(
              "SELECT {EVENT_COLUMNS} FROM events e WHERE {}
               ORDER BY e.created_at {order}, e.seq {order}
               LIMIT ? OFFSET ?",
              clause.sql
            ),
            &params,
          )?
        };
        tx.commit()?;
        Ok((total, raws))
      })
      .await?;

    Ok(EventPage {
      events: raws.into_iter().map(RawEvent::into_event).collect::<Result<_>>()?,
      total:  u64::try_from(total).unwrap_or_default(),
    })
  }

  async fn events_created_after(&self, after: Watermark, limit: usize) -> Result<Vec<Event>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let raws = load_events(
          &tx,
          &format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE e.created_at > ?1 OR (e.created_at = ?1 AND e.seq > ?2)
             ORDER BY e.created_at ASC, e.seq ASC
             LIMIT ?3"
          ),
          &[Value::Integer(after.created_at), Value::Integer(after.seq), Value::Integer(limit)],
        )?;
        tx.commit()?;
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn latest_watermark(&self) -> Result<Option<Watermark>> {
    Ok(
      self
        .conn
        .call(|conn| {
          Ok(
            conn
              .query_row(
                "SELECT created_at, seq FROM events ORDER BY created_at DESC, seq DESC LIMIT 1",
                [],
                |row| Ok(Watermark { created_at: row.get(0)?, seq: row.get(1)? }),
              )
              .optional()?,
          )
        })
        .await?,
    )
  }
}

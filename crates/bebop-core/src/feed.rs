//! Polling change feed over an [`EventStore`].
//!
//! A subscription owns one tokio task that repeatedly asks the store for
//! events after its watermark and hands them to the subscriber in
//! `(created_at, seq)` order. Each event is delivered at most once per
//! subscription.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
  event::Event,
  predicate::Predicate,
  store::{EventStore, Watermark},
};

#[derive(Debug, Clone)]
pub struct FeedOptions {
  /// Upper bound on events fetched per poll.
  pub batch_size:    usize,
  /// Pause after an empty batch or a failed poll.
  pub poll_interval: Duration,
  /// Replay from this instant instead of starting at the head of the log.
  pub start_at:      Option<DateTime<Utc>>,
  /// Only events matching this predicate are delivered. Skipped events still
  /// advance the watermark.
  pub filter:        Option<Predicate>,
}

impl Default for FeedOptions {
  fn default() -> Self {
    Self {
      batch_size:    100,
      poll_interval: Duration::from_secs(1),
      start_at:      None,
      filter:        None,
    }
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Handle to a running feed. Dropping it cancels the feed.
#[derive(Debug)]
pub struct Subscription {
  cancel: watch::Sender<bool>,
  task:   Option<JoinHandle<()>>,
}

impl Subscription {
  /// Ask the feed to stop. It stops within one poll interval and never
  /// delivers another event after noticing.
  pub fn cancel(&self) { self.cancel.send_replace(true); }

  /// Wait for the feed task to end, either through [`cancel`] or because the
  /// subscriber returned [`ControlFlow::Break`].
  ///
  /// [`cancel`]: Subscription::cancel
  pub async fn stopped(mut self) {
    if let Some(task) = self.task.take()
      && let Err(e) = task.await
      && e.is_panic()
    {
      warn!(error = %e, "change feed task panicked");
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) { self.cancel.send_replace(true); }
}

// ─── Feed ────────────────────────────────────────────────────────────────────

pub struct ChangeFeed;

impl ChangeFeed {
  /// Start a feed on the current tokio runtime.
  ///
  /// The starting watermark is fixed before this returns: every event
  /// inserted afterwards is delivered, and nothing already stored is, unless
  /// `options.start_at` asks for a replay.
  ///
  /// `on_event` returning [`ControlFlow::Break`] ends the feed. `on_error`
  /// sees every failed poll; the feed keeps going after a pause.
  pub async fn subscribe<S, F, E>(
    store: Arc<S>,
    options: FeedOptions,
    on_event: F,
    on_error: E,
  ) -> Result<Subscription, S::Error>
  where
    S: EventStore + 'static,
    F: FnMut(Event) -> ControlFlow<()> + Send + 'static,
    E: FnMut(&S::Error) + Send + 'static,
  {
    let start = match options.start_at {
      Some(at) => Watermark::at(at),
      None => store.latest_watermark().await?.unwrap_or_else(Watermark::origin),
    };

    let (cancel, cancelled) = watch::channel(false);
    let task = tokio::spawn(run(store, options, start, on_event, on_error, cancelled));
    info!(created_at = start.created_at, seq = start.seq, "change feed started");

    Ok(Subscription { cancel, task: Some(task) })
  }
}

async fn run<S, F, E>(
  store: Arc<S>,
  options: FeedOptions,
  mut watermark: Watermark,
  mut on_event: F,
  mut on_error: E,
  mut cancel: watch::Receiver<bool>,
) where
  S: EventStore,
  F: FnMut(Event) -> ControlFlow<()>,
  E: FnMut(&S::Error),
{
  let batch_size = options.batch_size.max(1);

  'feed: loop {
    let polled = tokio::select! {
      _ = cancelled(&mut cancel) => break 'feed,
      polled = store.events_created_after(watermark, batch_size) => polled,
    };

    match polled {
      Ok(events) => {
        let full = events.len() >= batch_size;
        debug!(count = events.len(), "change feed poll");

        for event in events {
          if *cancel.borrow() {
            break 'feed;
          }
          watermark = Watermark::of(&event);
          let wanted = options.filter.as_ref().is_none_or(|p| p.matches(&event));
          if wanted && on_event(event).is_break() {
            break 'feed;
          }
        }

        // More may be waiting; poll again straight away.
        if full {
          continue;
        }
      }
      Err(e) => {
        warn!(error = %e, "change feed poll failed");
        on_error(&e);
      }
    }

    tokio::select! {
      _ = cancelled(&mut cancel) => break 'feed,
      _ = tokio::time::sleep(options.poll_interval) => {}
    }
  }

  info!(created_at = watermark.created_at, seq = watermark.seq, "change feed stopped");
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
  let _ = cancel.wait_for(|&stop| stop).await;
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
  };

  use super::*;
  use crate::{
    event::NewEvent,
    memory::MemoryStore,
    predicate::{Comparison, EventField, Op, Operand},
  };

  fn fast() -> FeedOptions {
    FeedOptions { poll_interval: Duration::from_millis(10), ..FeedOptions::default() }
  }

  async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(2), rx.recv())
      .await
      .expect("timed out waiting for event")
      .expect("feed closed")
  }

  async fn subscribe(
    store: &Arc<MemoryStore>,
    options: FeedOptions,
  ) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = ChangeFeed::subscribe(
      Arc::clone(store),
      options,
      move |event| match tx.send(event) {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(()),
      },
      |_| {},
    )
    .await
    .unwrap();
    (sub, rx)
  }

  #[tokio::test]
  async fn delivers_new_events_in_order_exactly_once() {
    let store = Arc::new(MemoryStore::default());
    let (_sub, mut rx) = subscribe(&store, fast()).await;

    for name in ["t1", "t2", "t3"] {
      store.insert_event(NewEvent::new(name)).await.unwrap();
    }

    let names: Vec<String> = [recv(&mut rx).await, recv(&mut rx).await, recv(&mut rx).await]
      .into_iter()
      .map(|e| e.event_name)
      .collect();
    assert_eq!(names, ["t1", "t2", "t3"]);

    sleep(Duration::from_millis(60)).await;
    assert!(rx.try_recv().is_err(), "event delivered twice");
  }

  #[tokio::test]
  async fn starts_at_the_head_of_the_log() {
    let store = Arc::new(MemoryStore::default());
    store.insert_event(NewEvent::new("old")).await.unwrap();

    let (_sub, mut rx) = subscribe(&store, fast()).await;
    store.insert_event(NewEvent::new("new")).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_name, "new");
  }

  #[tokio::test]
  async fn replays_from_start_at() {
    let store = Arc::new(MemoryStore::default());
    store.insert_event(NewEvent::new("a")).await.unwrap();
    store.insert_event(NewEvent::new("b")).await.unwrap();

    let options = FeedOptions { start_at: Some(DateTime::UNIX_EPOCH), ..fast() };
    let (_sub, mut rx) = subscribe(&store, options).await;

    assert_eq!(recv(&mut rx).await.event_name, "a");
    assert_eq!(recv(&mut rx).await.event_name, "b");
  }

  #[tokio::test]
  async fn drains_backlog_across_batches() {
    let store = Arc::new(MemoryStore::default());
    for i in 0..5 {
      store.insert_event(NewEvent::new(format!("e{i}"))).await.unwrap();
    }

    let options = FeedOptions { batch_size: 2, start_at: Some(DateTime::UNIX_EPOCH), ..fast() };
    let (_sub, mut rx) = subscribe(&store, options).await;

    for i in 0..5 {
      assert_eq!(recv(&mut rx).await.event_name, format!("e{i}"));
    }
  }

  #[tokio::test]
  async fn filter_skips_non_matching_events() {
    let store = Arc::new(MemoryStore::default());
    let filter = Predicate::Compare(Comparison::new(
      EventField::EventName,
      Op::Eq,
      Operand::Text("keep".into()),
    ));
    let (_sub, mut rx) = subscribe(&store, FeedOptions { filter: Some(filter), ..fast() }).await;

    for name in ["skip", "keep", "skip", "keep"] {
      store.insert_event(NewEvent::new(name)).await.unwrap();
    }

    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.event_name, "keep");
    assert_eq!(second.event_name, "keep");
    assert!(first.seq < second.seq);
  }

  #[tokio::test]
  async fn break_from_subscriber_stops_the_feed() {
    let store = Arc::new(MemoryStore::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let sub = ChangeFeed::subscribe(
      Arc::clone(&store),
      fast(),
      move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Break(())
      },
      |_| {},
    )
    .await
    .unwrap();

    store.insert_event(NewEvent::new("a")).await.unwrap();
    store.insert_event(NewEvent::new("b")).await.unwrap();

    timeout(Duration::from_secs(2), sub.stopped()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn cancel_stops_the_feed() {
    let store = Arc::new(MemoryStore::default());
    let (sub, mut rx) = subscribe(&store, fast()).await;

    sub.cancel();
    timeout(Duration::from_secs(2), sub.stopped()).await.unwrap();

    store.insert_event(NewEvent::new("late")).await.unwrap();
    sleep(Duration::from_millis(40)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn recovers_after_poll_errors() {
    let store = Arc::new(MemoryStore::default());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _sub = ChangeFeed::subscribe(
      Arc::clone(&store),
      fast(),
      move |event| {
        let _ = tx.send(event);
        ControlFlow::Continue(())
      },
      move |e| sink.lock().unwrap().push(e.to_string()),
    )
    .await
    .unwrap();

    store.fail_next_reads(2);
    store.insert_event(NewEvent::new("after")).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_name, "after");
    assert_eq!(errors.lock().unwrap().len(), 2);
  }
}

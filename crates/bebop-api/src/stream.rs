//! `GET /events/stream`: server-sent change feed.
//!
//! Each stored event is sent as one SSE message of type `event` whose `id` is
//! the store sequence number and whose data is the event JSON. The feed is
//! cancelled when the client disconnects, when the client falls more than
//! `stream_buffer` events behind, or when the server shuts down.

use std::{
  convert::Infallible,
  ops::ControlFlow,
  pin::Pin,
  task::{Context, Poll},
};

use axum::{
  extract::{Query, State},
  response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use bebop_core::{
  event::Event,
  feed::{FeedOptions, Subscription},
  filter::EventFilter,
  store::EventStore,
};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::StreamExt as _;
use tracing::warn;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
  /// Comma-separated event names to deliver; all events when absent.
  pub event_name: Option<String>,
  /// Replay events created at or after this instant before following live.
  pub start_at:   Option<DateTime<Utc>>,
}

/// Receives feed events and keeps the subscription alive for as long as the
/// response body exists.
struct FeedStream {
  events:        mpsc::Receiver<Event>,
  _subscription: Subscription,
}

impl Stream for FeedStream {
  type Item = Event;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
    self.events.poll_recv(cx)
  }
}

pub async fn handler<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError>
where
  S: EventStore + 'static,
{
  let names: Vec<&str> = params
    .event_name
    .as_deref()
    .unwrap_or_default()
    .split(',')
    .map(str::trim)
    .filter(|n| !n.is_empty())
    .collect();
  let filter = if names.is_empty() {
    None
  } else {
    Some(state.service.compile(&EventFilter::event_name_in(names))?)
  };

  let options = FeedOptions { start_at: params.start_at, filter, ..state.settings.feed.clone() };
  let (tx, rx) = mpsc::channel(state.settings.stream_buffer.max(1));
  let subscription = state
    .service
    .subscribe(
      options,
      move |event| match tx.try_send(event) {
        Ok(()) => ControlFlow::Continue(()),
        Err(TrySendError::Full(event)) => {
          warn!(seq = event.seq, "stream client fell behind; closing the stream");
          ControlFlow::Break(())
        }
        Err(TrySendError::Closed(_)) => ControlFlow::Break(()),
      },
      |_| {},
    )
    .await?;

  let stream = FeedStream { events: rx, _subscription: subscription }.filter_map(|event| {
    match SseEvent::default()
      .event("event")
      .id(event.seq.to_string())
      .json_data(&event)
    {
      Ok(sse) => Some(Ok(sse)),
      Err(e) => {
        tracing::error!(error = %e, id = %event.id, "failed to serialize event");
        None
      }
    }
  });

  let stream = futures_util::StreamExt::take_until(stream, state.settings.shutdown.requested());

  Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

//! JSON-over-HTTP transport for Bebop.
//!
//! Exposes an axum [`Router`] backed by an [`EventService`] over any
//! [`EventStore`]. Auth, TLS, and transport concerns are the caller's
//! responsibility: an upstream layer that has verified the caller's identity
//! inserts [`VerifiedClaims`] into the request extensions, and `/collect`
//! records them.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = bebop_api::api_router(service, ApiSettings::default());
//! ```

pub mod catalog;
pub mod collect;
pub mod error;
pub mod query;
pub mod shutdown;
pub mod stream;

use std::collections::BTreeMap;

use axum::{
  Json, Router,
  response::IntoResponse,
  routing::{get, post},
};
use bebop_core::{EventService, feed::FeedOptions, store::EventStore};
use serde_json::json;

pub use error::ApiError;
pub use shutdown::Shutdown;

/// Identity claims of the caller, already verified upstream.
#[derive(Debug, Clone, Default)]
pub struct VerifiedClaims(pub BTreeMap<String, String>);

/// Transport-level limits and defaults.
#[derive(Debug, Clone)]
pub struct ApiSettings {
  /// Largest page `/events/query` returns; also the default `limit`.
  pub max_page_size: usize,
  /// Base options for `/events/stream` subscriptions.
  pub feed:          FeedOptions,
  /// Events buffered per stream client. A client that falls this far behind
  /// is disconnected.
  pub stream_buffer: usize,
  /// Ends open streams when fired.
  pub shutdown:      Shutdown,
}

impl Default for ApiSettings {
  fn default() -> Self {
    Self {
      max_page_size: 100,
      feed:          FeedOptions::default(),
      stream_buffer: 1000,
      shutdown:      Shutdown::default(),
    }
  }
}

/// Shared state threaded through all axum handlers.
pub struct ApiState<S> {
  pub service:  EventService<S>,
  pub settings: ApiSettings,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { service: self.service.clone(), settings: self.settings.clone() }
  }
}

/// Build a fully-materialised API router for `service`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(service: EventService<S>, settings: ApiSettings) -> Router<()>
where
  S: EventStore + 'static,
{
  Router::new()
    .route("/", get(root))
    // Collection
    .route("/collect", get(collect::status).post(collect::create::<S>))
    .route("/collect/batch", post(collect::create_batch::<S>))
    // Reads
    .route("/events/query", post(query::handler::<S>))
    .route("/events/stream", get(stream::handler::<S>))
    .route("/catalog", get(catalog::handler::<S>))
    .with_state(ApiState { service, settings })
}

/// `GET /`
async fn root() -> impl IntoResponse { Json(json!({ "server": "running" })) }

//! Handlers for the collector endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/collect` | Liveness message with the server time |
//! | `POST` | `/collect` | Body: [`CollectBody`]; returns 201 + `{"id"}` |
//! | `POST` | `/collect/batch` | Body: `{"events": [CollectBody, ...]}`; returns 201 + `{"ids"}` |

use std::collections::BTreeMap;

use axum::{
  Extension, Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use bebop_core::{
  event::{EventId, NewEvent, ParamValue},
  store::EventStore,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ApiState, VerifiedClaims, error::ApiError};

/// One event as sent by client SDKs.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectBody {
  #[serde(rename = "$event")]
  pub event:  String,
  #[serde(rename = "$params", default)]
  pub params: IndexMap<String, ParamValue>,
  #[serde(rename = "$trace", default)]
  pub trace:  Vec<serde_json::Value>,
}

impl CollectBody {
  fn into_event(self, claims: &BTreeMap<String, String>) -> NewEvent {
    NewEvent {
      event_name: self.event,
      params:     self.params,
      traces:     self.trace,
      claims:     claims.clone(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
  pub events: Vec<CollectBody>,
}

#[derive(Debug, Serialize)]
pub struct Collected {
  pub id: EventId,
}

#[derive(Debug, Serialize)]
pub struct CollectedBatch {
  pub ids: Vec<EventId>,
}

/// `GET /collect`
pub async fn status() -> impl IntoResponse {
  Json(json!({
    "message":   "Collect endpoint is running",
    "timestamp": Utc::now(),
  }))
}

/// `POST /collect`
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  claims: Option<Extension<VerifiedClaims>>,
  Json(body): Json<CollectBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EventStore + 'static,
{
  let claims = claims.map(|Extension(c)| c.0).unwrap_or_default();
  let id = state.service.ingest(body.into_event(&claims)).await?;
  Ok((StatusCode::CREATED, Json(Collected { id })))
}

/// `POST /collect/batch`
pub async fn create_batch<S>(
  State(state): State<ApiState<S>>,
  claims: Option<Extension<VerifiedClaims>>,
  Json(body): Json<BatchBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EventStore + 'static,
{
  let claims = claims.map(|Extension(c)| c.0).unwrap_or_default();
  let events = body.events.into_iter().map(|b| b.into_event(&claims)).collect();
  let ids = state.service.ingest_batch(events).await?;
  Ok((StatusCode::CREATED, Json(CollectedBatch { ids })))
}

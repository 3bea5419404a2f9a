//! `GET /catalog`: the configured event types, parameters, and claims.

use axum::{Json, extract::State};
use bebop_core::{catalog::CatalogSnapshot, store::EventStore};

use crate::ApiState;

pub async fn handler<S>(State(state): State<ApiState<S>>) -> Json<CatalogSnapshot>
where
  S: EventStore + 'static,
{
  Json(state.service.catalog())
}

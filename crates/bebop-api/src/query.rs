//! `POST /events/query`: filtered, paged event search.

use axum::{Json, extract::State};
use bebop_core::{
  filter::EventFilter,
  store::{EventPage, EventStore, Order, Page},
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryBody {
  #[serde(default, rename = "where")]
  pub filter: EventFilter,
  #[serde(default)]
  pub order:  Order,
  /// Defaults to, and is capped at, the configured page size.
  pub limit:  Option<usize>,
  #[serde(default)]
  pub offset: usize,
}

pub async fn handler<S>(
  State(state): State<ApiState<S>>,
  Json(body): Json<QueryBody>,
) -> Result<Json<EventPage>, ApiError>
where
  S: EventStore + 'static,
{
  let max = state.settings.max_page_size;
  let limit = body.limit.unwrap_or(max).min(max);
  let page = state
    .service
    .query(&body.filter, body.order, Page::new(limit, body.offset))
    .await?;
  Ok(Json(page))
}

//! [`EventService`] ties the catalog, the store, and the change feed
//! together. Transports talk to this type only.

use std::{ops::ControlFlow, sync::Arc};

use tracing::info;

use crate::{
  catalog::{Catalog, CatalogConfig, CatalogHandle, CatalogSnapshot},
  error::{Error, Result},
  event::{Event, EventId, NewEvent},
  feed::{ChangeFeed, FeedOptions, Subscription},
  filter::EventFilter,
  ingest,
  predicate::{self, Predicate},
  store::{EventPage, EventStore, Order, Page},
};

pub struct EventService<S> {
  store:   Arc<S>,
  catalog: CatalogHandle,
}

impl<S> Clone for EventService<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), catalog: self.catalog.clone() }
  }
}

impl<S: EventStore + 'static> EventService<S> {
  pub fn new(store: Arc<S>, catalog: CatalogHandle) -> Self { Self { store, catalog } }

  /// Validate, sanitise, and persist one event.
  pub async fn ingest(&self, event: NewEvent) -> Result<EventId> {
    let event = ingest::validate(&self.catalog.current(), event)?;
    self.store.insert_event(event).await.map_err(persistence)
  }

  /// Validate every event, then persist them in order.
  ///
  /// Nothing is written when any event is rejected. A store failure part-way
  /// leaves the events before it stored.
  pub async fn ingest_batch(&self, events: Vec<NewEvent>) -> Result<Vec<EventId>> {
    let catalog = self.catalog.current();
    let events = events
      .into_iter()
      .map(|event| ingest::validate(&catalog, event))
      .collect::<Result<Vec<_>, _>>()?;

    let mut ids = Vec::with_capacity(events.len());
    for event in events {
      ids.push(self.store.insert_event(event).await.map_err(persistence)?);
    }
    Ok(ids)
  }

  /// Compile `filter` against the current catalog.
  pub fn compile(&self, filter: &EventFilter) -> Result<Predicate> {
    Ok(predicate::compile(filter, &self.catalog.current())?)
  }

  pub async fn query(&self, filter: &EventFilter, order: Order, page: Page) -> Result<EventPage> {
    let predicate = self.compile(filter)?;
    self.store.query(predicate, order, page).await.map_err(persistence)
  }

  /// Start a change feed. See [`ChangeFeed::subscribe`].
  pub async fn subscribe<F, E>(&self, options: FeedOptions, on_event: F, on_error: E) -> Result<Subscription>
  where
    F: FnMut(Event) -> ControlFlow<()> + Send + 'static,
    E: FnMut(&S::Error) + Send + 'static,
  {
    ChangeFeed::subscribe(Arc::clone(&self.store), options, on_event, on_error)
      .await
      .map_err(persistence)
  }

  pub fn catalog(&self) -> CatalogSnapshot { self.catalog.current().snapshot() }

  /// Rebuild the catalog from `config` and swap it in. On error the current
  /// catalog stays in place.
  pub fn reload(&self, config: &CatalogConfig) -> Result<()> {
    let catalog = Catalog::load(config)?;
    let event_types = catalog.event_types().len();
    let claims = catalog.claim_names().len();
    self.catalog.replace(catalog);
    info!(event_types, claims, "catalog reloaded");
    Ok(())
  }
}

fn persistence<E: std::error::Error + Send + Sync + 'static>(e: E) -> Error {
  Error::Persistence(Box::new(e))
}

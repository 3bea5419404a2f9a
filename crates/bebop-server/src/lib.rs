//! Bebop server assembly: configuration and the top-level HTTP application.

pub mod config;

pub use config::{FeedConfig, ServerConfig};

use axum::Router;
use bebop_api::{ApiSettings, Shutdown};
use bebop_core::{EventService, store::EventStore};
use tower_http::trace::TraceLayer;

/// The public HTTP application with request tracing. Firing `shutdown` ends
/// every open event stream.
pub fn app<S>(service: EventService<S>, cfg: &ServerConfig, shutdown: Shutdown) -> Router
where
  S: EventStore + 'static,
{
  let settings = ApiSettings { shutdown, ..cfg.api_settings() };
  bebop_api::api_router(service, settings).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use std::{path::Path, sync::Arc, time::Duration};

  use bebop_core::catalog::{Catalog, CatalogConfig, CatalogHandle};
  use bebop_store_sqlite::SqliteStore;
  use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
    time::timeout,
  };

  use super::*;

  #[tokio::test]
  async fn graceful_shutdown_closes_open_streams() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let catalog = Catalog::load(&CatalogConfig::default()).unwrap();
    let service = EventService::new(Arc::new(store), CatalogHandle::new(catalog));
    let cfg = ServerConfig::load(Path::new("/nonexistent/bebop.yml")).unwrap();

    let (trigger, shutdown) = Shutdown::new();
    let app = app(service, &cfg, shutdown.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
      axum::serve(listener, app).with_graceful_shutdown(shutdown.requested()).await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
      .write_all(b"GET /events/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
      .await
      .unwrap();
    let mut head = [0u8; 512];
    let n = timeout(Duration::from_secs(2), client.read(&mut head)).await.unwrap().unwrap();
    assert!(head[..n].starts_with(b"HTTP/1.1 200"), "{}", String::from_utf8_lossy(&head[..n]));

    trigger.send_replace(true);
    timeout(Duration::from_secs(5), server)
      .await
      .expect("server still running with a stream open")
      .unwrap()
      .unwrap();
  }
}

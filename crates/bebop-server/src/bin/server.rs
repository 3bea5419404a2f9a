//! bebop server binary.
//!
//! Reads `bebop.yml` (or the path specified with `--config`), opens an
//! in-process SQLite store, and serves the collector and query API over HTTP.
//!
//! `SIGHUP` re-reads the configuration and swaps in the new event catalog;
//! `SIGINT` and `SIGTERM` shut the server down gracefully.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use bebop_core::{
  EventService,
  catalog::{Catalog, CatalogHandle},
};
use bebop_api::Shutdown;
use bebop_server::{ServerConfig, config::expand_tilde};
use bebop_store_sqlite::SqliteStore;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bebop event collection server")]
struct Cli {
  /// Path to the YAML configuration file.
  #[arg(short, long, default_value = "bebop.yml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config).context("failed to read configuration")?;
  let catalog = Catalog::load(&server_cfg.catalog()).context("invalid event catalog")?;
  if catalog.is_free_form() {
    tracing::warn!("no event types configured; accepting any event name");
  }

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let service = EventService::new(Arc::new(store), CatalogHandle::new(catalog));
  tokio::spawn(reload_on_hangup(service.clone(), cli.config.clone()));

  let (stop_streams, shutdown) = Shutdown::new();
  let app = bebop_server::app(service, &server_cfg, shutdown);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      shutdown_signal().await;
      stop_streams.send_replace(true);
    })
    .await
    .context("server error")?;

  tracing::info!("server stopped");
  Ok(())
}

/// Reload the event catalog each time the process receives `SIGHUP`. A
/// configuration that fails to load is reported and the running catalog kept.
#[cfg(unix)]
async fn reload_on_hangup(service: EventService<SqliteStore>, path: PathBuf) {
  use tokio::signal::unix::{SignalKind, signal};

  let mut hangup = match signal(SignalKind::hangup()) {
    Ok(s) => s,
    Err(e) => {
      tracing::error!(error = %e, "failed to install SIGHUP handler; catalog reload disabled");
      return;
    }
  };

  while hangup.recv().await.is_some() {
    tracing::info!(path = %path.display(), "received SIGHUP, reloading catalog");
    let result = ServerConfig::load(&path)
      .context("failed to read configuration")
      .and_then(|cfg| service.reload(&cfg.catalog()).context("invalid event catalog"));
    if let Err(e) = result {
      tracing::error!(error = %format!("{e:#}"), "catalog reload failed; keeping the current catalog");
    }
  }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_service: EventService<SqliteStore>, _path: PathBuf) {}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to install Ctrl+C handler");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut s) => {
        s.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "failed to install SIGTERM handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => tracing::info!("received SIGINT, initiating graceful shutdown"),
    () = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
  }
}

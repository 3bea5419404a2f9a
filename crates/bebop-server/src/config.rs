//! Runtime server configuration.
//!
//! Read from a YAML file (default `bebop.yml`) with `BEBOP_*` environment
//! overrides; nested keys use `__`, e.g. `BEBOP_FEED__BATCH_SIZE=500`.
//!
//! ```yaml
//! port: 3000
//! store_path: ~/.local/share/bebop/events.db
//! claims: [tenant, sub]
//! event_types:
//!   - type: purchase
//!     trace: true
//!     params:
//!       - amount: numeric
//!       - { name: sku, kind: string, label: SKU }
//! ```

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use bebop_api::ApiSettings;
use bebop_core::{
  catalog::{CatalogConfig, EventTypeConfig},
  feed::FeedOptions,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:          String,
  #[serde(default = "default_port")]
  pub port:          u16,
  #[serde(default = "default_store_path")]
  pub store_path:    PathBuf,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: usize,
  #[serde(default)]
  pub feed:          FeedConfig,
  #[serde(default)]
  pub event_types:   Vec<EventTypeConfig>,
  #[serde(default)]
  pub claims:        Vec<String>,
}

/// Change-feed polling settings for `/events/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
  #[serde(default = "default_batch_size")]
  pub batch_size:       usize,
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  /// Events buffered per stream client before it is disconnected.
  #[serde(default = "default_stream_buffer")]
  pub stream_buffer:    usize,
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      batch_size:       default_batch_size(),
      poll_interval_ms: default_poll_interval_ms(),
      stream_buffer:    default_stream_buffer(),
    }
  }
}

fn default_host() -> String { "0.0.0.0".to_owned() }
fn default_port() -> u16 { 3000 }
fn default_store_path() -> PathBuf { PathBuf::from("bebop.db") }
fn default_max_page_size() -> usize { 100 }
fn default_batch_size() -> usize { 100 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_stream_buffer() -> usize { 1000 }

impl ServerConfig {
  /// Layer the file at `path` (if it exists) and the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(
        config::Environment::with_prefix("BEBOP")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn catalog(&self) -> CatalogConfig {
    CatalogConfig { event_types: self.event_types.clone(), claims: self.claims.clone() }
  }

  pub fn api_settings(&self) -> ApiSettings {
    ApiSettings {
      max_page_size: self.max_page_size,
      feed:          FeedOptions {
        batch_size:    self.feed.batch_size,
        poll_interval: Duration::from_millis(self.feed.poll_interval_ms),
        ..FeedOptions::default()
      },
      stream_buffer: self.feed.stream_buffer,
      ..ApiSettings::default()
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

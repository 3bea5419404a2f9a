//! SQLite backend for the Bebop event store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Predicates are lowered to SQL in
//! [`sql`]; rows are decoded in `encode`.

mod encode;
mod schema;
mod store;

pub mod error;
pub mod sql;

pub use error::{Error, Result};
pub use store::SqliteStore;

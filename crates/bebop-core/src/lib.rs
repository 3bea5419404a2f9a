//! Core types and trait definitions for the Bebop event service.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::EventStore`]; transports drive
//! [`service::EventService`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod error;
pub mod event;
pub mod feed;
pub mod filter;
pub mod ingest;
pub mod predicate;
pub mod service;
pub mod store;

#[cfg(test)]
mod memory;

pub use error::{Error, Result};
pub use service::EventService;

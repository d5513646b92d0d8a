//! # lib_feedhub
//!
//! Ingests an append-only upstream feed and per-entity update sequences from
//! an upstream that can only be polled, and republishes them to many local
//! subscribers as ordered, de-duplicated streams.
//!
//! ## Core Components:
//!
//! - **`core`**: permit gate, versioned entity logs and their registry, the
//!   typed fan-out bus and the injectable clock.
//! - **`ingestors`**: the catch-up search, the global feed loop and the
//!   per-entity poller.
//! - **`sources`**: the upstream and archive interfaces plus the static
//!   replay source.
//! - **`connections`**: cursor persistence (file, memory, Redis).
//!
//! ## Feature gates:
//!
//! - `connections`: Redis cursor store.
//! - `retrieve`: live HTTP upstream and archive.
//! - `loggers`: console and rolling JSON file logging.
//! - `configs`: layered service configuration.
//! - `full`: all of the above.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Cursor persistence.
pub mod connections;
/// In-memory engine.
pub mod core;
/// Feed and entity ingestion loops.
pub mod ingestors;
/// Feed items, entity updates and their identifiers.
pub mod model;
/// Upstream and archive interfaces.
pub mod sources;

/// Layered service configuration.
#[cfg(feature = "configs")]
pub mod configs;
/// Logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// HTTP upstream access.
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use model::{Classification, EntityId, EntityUpdate, FeedId, FeedItem};

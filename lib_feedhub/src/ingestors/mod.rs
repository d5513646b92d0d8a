//! # Data Ingestors Module
//!
//! The two ingestion paths that pull data out of the upstream, which offers
//! no push mechanism of its own.
//!
//! ## Contained Modules:
//! - **`catch_up`**: The backward doubling search that locates the unseen
//!   suffix of the global feed.
//! - **`feed_polling`**: The self-scheduling loop that runs the catch-up
//!   search on a cadence, fans items out and persists the cursor.
//! - **`entity_polling`**: Periodic per-entity snapshot polling into the
//!   entity log registry.

/// Backfill search over the global feed.
pub mod catch_up;
/// Per-entity snapshot poller.
pub mod entity_polling;
/// Global feed ingestion loop.
pub mod feed_polling;

// --- Public API Re-exports ---
pub use catch_up::{CatchUpConfig, CatchUpFetcher, CatchUpOutcome};
pub use entity_polling::{EntityPoller, PollReport};
pub use feed_polling::{CycleReport, IngestionError, IngestionLoop, IngestionSettings, IngestionState};

//! # Core Engine Module
//!
//! The in-memory heart of `feedhub`: the state that survives between polls
//! and the plumbing that hands it to subscribers. Everything here is
//! runtime-agnostic apart from tokio's sync primitives, and nothing here
//! talks to the network.
//!
//! ## Core Components:
//!
//! - **`permit_gate`**: Many-readers / one-writer gate with explicit
//!   upgrade and downgrade, used to guard every entity log.
//!
//! - **`topic`**: Zero-copy broadcaster with bounded per-subscriber
//!   channels. Offers a lossy publish and a two-phase lossless publish.
//!
//! - **`entity_log`**: The versioned, append-mostly update log of a single
//!   entity, republishing every accepted version.
//!
//! - **`registry`**: Owns the entity logs and caches archived history of
//!   entities that are no longer live.
//!
//! - **`fanout`**: Routes feed items to a global topic and to one topic per
//!   classification.
//!
//! - **`clock`**: The injectable time source that paces the ingestion loops.

/// Injectable time source.
pub mod clock;
/// Per-entity versioned update log.
pub mod entity_log;
/// Global and per-classification feed broadcast.
pub mod fanout;
/// Many-readers / one-writer gate.
pub mod permit_gate;
/// Owner of every entity log and of the archive cache.
pub mod registry;
/// Bounded, zero-copy broadcast topic.
pub mod topic;

// --- Public API Re-exports ---
pub use clock::{Clock, TimeSource, MAX_CLOCK_FACTOR, MIN_CLOCK_FACTOR};
pub use entity_log::{LogEntry, LogError, LogSettings, VersionedEntityLog};
pub use fanout::{FanoutSettings, TypedFanoutBus};
pub use permit_gate::{PermitGate, ReadPermit, WritePermit};
pub use registry::{EntityLogRegistry, Snapshot};
pub use topic::{PendingDelivery, Subscription, Topic};

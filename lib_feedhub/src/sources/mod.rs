//! # Upstream Sources
//!
//! The collaborator interfaces the ingestion core pulls data through, and the
//! closed set of implementations the service can be configured with.
//!
//! - [`UpstreamFeed`]: reverse-chronological pages of the global feed plus
//!   per-entity snapshots.
//! - [`Archive`]: full history of entities that are no longer live.
//!
//! Which implementation backs each interface is decided once, when the
//! configuration is loaded, by picking a variant of [`FeedSource`] or
//! [`ArchiveSource`]. Nothing is looked up dynamically at runtime.

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::model::{EntityId, EntityUpdate, FeedItem};

/// Replays a recorded feed from memory or from a JSON file.
pub mod static_feed;
/// Configuration-time selection between the available sources.
pub mod select;

pub use select::{ArchiveSource, FeedSource};
pub use static_feed::StaticFeed;

/// Failures of the upstream feed. All of them are transient from the point
/// of view of the ingestion loops.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, timeout or middleware failure.
    #[error("network error: {0}")]
    Network(String),
    /// Upstream answered with a non-success status.
    #[error("upstream returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body returned with it, if any.
        body: String,
    },
    /// Response could not be understood as a whole.
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    /// Upstream has never heard of this entity.
    #[error("entity {0} is unknown upstream")]
    UnknownEntity(EntityId),
    /// Local file backing a static source could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the archive lookup.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive has nothing for this entity.
    #[error("no archived history for entity {0}")]
    NotFound(EntityId),
    /// Connection, timeout or middleware failure.
    #[error("archive network error: {0}")]
    Network(String),
    /// Archive answered with something unparseable.
    #[error("malformed archive payload: {0}")]
    Malformed(String),
}

/// The upstream the ingestion loops poll.
pub trait UpstreamFeed: Send + Sync {
    /// The `limit` most recent feed items, newest first.
    fn fetch_recent(&self, limit: usize) -> impl Future<Output = Result<Vec<FeedItem>, UpstreamError>> + Send;

    /// Current snapshot of one entity.
    fn fetch_entity_update(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<EntityUpdate, UpstreamError>> + Send;
}

/// Historical lookup for entities that are not live.
pub trait Archive<T = Value>: Send + Sync {
    /// Every archived version of `entity_id`.
    fn historical_snapshot(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<BTreeMap<u64, T>, ArchiveError>> + Send;
}

/// An archive that knows nothing. Every lookup is `NotFound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArchive;

impl<T: Send> Archive<T> for NoArchive {
    async fn historical_snapshot(&self, entity_id: &EntityId) -> Result<BTreeMap<u64, T>, ArchiveError> {
        Err(ArchiveError::NotFound(entity_id.clone()))
    }
}

/// Decodes each element on its own and drops the ones that do not parse, so
/// one malformed item never costs the rest of the batch.
pub fn decode_feed_items(values: Vec<Value>) -> Vec<FeedItem> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<FeedItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed feed item");
                None
            }
        })
        .collect()
}

use std::collections::BTreeMap;

use serde_json::Value;

use super::{Archive, ArchiveError, NoArchive, StaticFeed, UpstreamError, UpstreamFeed};
use crate::model::{EntityId, EntityUpdate, FeedItem};
#[cfg(feature = "retrieve")]
use crate::retrieve::upstream_http::{HttpArchive, HttpFeed};

/// The upstream feed strategy chosen at configuration time.
pub enum FeedSource {
    /// Polls the live HTTP API.
    #[cfg(feature = "retrieve")]
    Live(HttpFeed),
    /// Replays a recorded capture.
    Static(StaticFeed),
}

/// The archive strategy chosen at configuration time.
pub enum ArchiveSource {
    /// Queries the HTTP archive.
    #[cfg(feature = "retrieve")]
    Http(HttpArchive),
    /// No archive; historical lookups fail with `NotFound`.
    Disabled(NoArchive),
}

impl UpstreamFeed for FeedSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedItem>, UpstreamError> {
        match self {
            #[cfg(feature = "retrieve")]
            Self::Live(feed) => feed.fetch_recent(limit).await,
            Self::Static(feed) => feed.fetch_recent(limit).await,
        }
    }

    async fn fetch_entity_update(&self, entity_id: &EntityId) -> Result<EntityUpdate, UpstreamError> {
        match self {
            #[cfg(feature = "retrieve")]
            Self::Live(feed) => feed.fetch_entity_update(entity_id).await,
            Self::Static(feed) => feed.fetch_entity_update(entity_id).await,
        }
    }
}

impl Archive<Value> for ArchiveSource {
    async fn historical_snapshot(&self, entity_id: &EntityId) -> Result<BTreeMap<u64, Value>, ArchiveError> {
        match self {
            #[cfg(feature = "retrieve")]
            Self::Http(archive) => archive.historical_snapshot(entity_id).await,
            Self::Disabled(archive) => Archive::<Value>::historical_snapshot(archive, entity_id).await,
        }
    }
}

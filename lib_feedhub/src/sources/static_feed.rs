//! # Static Feed
//!
//! An [`UpstreamFeed`] that serves a recorded feed. Used for replaying a
//! capture during development and as the upstream of the integration tests.
//! Items are kept in chronological order and served newest first, exactly
//! like the live endpoint pages them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{decode_feed_items, UpstreamError, UpstreamFeed};
use crate::model::{EntityId, EntityUpdate, FeedItem};

/// On-disk layout of a recorded capture.
#[derive(Debug, Default, Deserialize)]
struct Capture {
    /// Feed items, oldest first.
    #[serde(default)]
    feed: Vec<Value>,
    /// Latest known snapshot per entity.
    #[serde(default)]
    entities: Vec<EntityUpdate>,
}

/// Recorded upstream. See the module docs.
#[derive(Debug, Default)]
pub struct StaticFeed {
    items: Mutex<Vec<FeedItem>>,
    entities: Mutex<HashMap<EntityId, EntityUpdate>>,
    fetches: AtomicUsize,
}

impl StaticFeed {
    /// Serves `items`, which must be in chronological order.
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Loads a capture file: `{"feed": [..oldest first..], "entities": [..]}`.
    /// Malformed feed items are skipped.
    pub async fn from_path(path: &Path) -> Result<Self, UpstreamError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let capture: Capture =
            serde_json::from_str(&raw).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

        let feed = Self::new(decode_feed_items(capture.feed));
        for update in capture.entities {
            feed.set_entity(update);
        }
        info!(path = %path.display(), items = feed.len(), "static feed loaded");
        Ok(feed)
    }

    /// Appends a new (newest) item.
    pub fn push(&self, item: FeedItem) {
        self.items.lock().expect("static feed lock poisoned").push(item);
    }

    /// Replaces the snapshot served for one entity.
    pub fn set_entity(&self, update: EntityUpdate) {
        self.entities
            .lock()
            .expect("static feed lock poisoned")
            .insert(update.entity_id.clone(), update);
    }

    /// Number of recorded items.
    pub fn len(&self) -> usize {
        self.items.lock().expect("static feed lock poisoned").len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times [`UpstreamFeed::fetch_recent`] was called.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl UpstreamFeed for StaticFeed {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedItem>, UpstreamError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let items = self.items.lock().expect("static feed lock poisoned");
        Ok(items.iter().rev().take(limit).cloned().collect())
    }

    async fn fetch_entity_update(&self, entity_id: &EntityId) -> Result<EntityUpdate, UpstreamError> {
        self.entities
            .lock()
            .expect("static feed lock poisoned")
            .get(entity_id)
            .cloned()
            .ok_or_else(|| UpstreamError::UnknownEntity(entity_id.clone()))
    }
}

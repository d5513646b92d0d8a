//! # Redis Cursor Store
//!
//! Keeps the feed cursor under a single Redis key, for deployments where the
//! service host has no durable disk.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::debug;

use crate::connections::cursor_store::{CursorStore, CursorStoreError};
use crate::model::FeedId;

/// Key used when none is configured.
pub const DEFAULT_CURSOR_KEY: &str = "feedhub:cursor";

/// Cursor backend on a Redis string key.
#[derive(Clone)]
pub struct RedisCursorStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisCursorStore {
    /// Connects to `url` (e.g. "redis://127.0.0.1/") and stores the cursor
    /// under `key`. The connection manager reconnects on its own afterwards.
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, CursorStoreError> {
        let client = Client::open(url).map_err(redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_error)?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    /// Key the cursor lives under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl CursorStore for RedisCursorStore {
    async fn load(&self) -> Result<Option<FeedId>, CursorStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await.map_err(redis_error)?;
        Ok(raw.filter(|id| !id.is_empty()).map(FeedId::new))
    }

    async fn save(&self, id: &FeedId) -> Result<(), CursorStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(&self.key, id.as_str()).await.map_err(redis_error)?;
        debug!(cursor = %id, key = %self.key, "cursor saved");
        Ok(())
    }
}

fn redis_error(e: redis::RedisError) -> CursorStoreError {
    CursorStoreError::Redis(e.to_string())
}

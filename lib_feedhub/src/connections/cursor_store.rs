//! # Cursor Store
//!
//! Durable home of the global feed cursor: the id of the newest feed item the
//! ingestion loop has fully published. It is read once at startup and
//! overwritten after every batch that moved it.
//!
//! Saves happen often, so every backend overwrites a single value instead of
//! appending. A failed save never stops ingestion; the loop keeps its
//! in-memory cursor and only risks redelivering a batch after a restart.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::model::FeedId;

/// Failures of a cursor backend.
#[derive(Debug, Error)]
pub enum CursorStoreError {
    /// Filesystem failure.
    #[error("cursor file I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Redis failure.
    #[error("cursor redis error: {0}")]
    Redis(String),
}

/// Durable storage for the feed cursor.
pub trait CursorStore: Send + Sync {
    /// The last saved cursor, `None` on first run.
    fn load(&self) -> impl Future<Output = Result<Option<FeedId>, CursorStoreError>> + Send;

    /// Overwrites the saved cursor.
    fn save(&self, id: &FeedId) -> impl Future<Output = Result<(), CursorStoreError>> + Send;
}

/// Keeps the cursor in a small text file. Saves go to a sibling temp file
/// that is synced and then renamed over the target, so a crash leaves either
/// the old or the new value, never a torn one.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Store backed by `path`. Parent directories are created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cursor file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<FeedId>, CursorStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| FeedId::new(id)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: &FeedId) -> Result<(), CursorStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write and sync the sibling first; the rename is the commit point.
        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(id.as_str().as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(cursor = %id, path = %self.path.display(), "cursor saved");
        Ok(())
    }
}

/// Process-local cursor. Survives nothing; meant for replays and tests.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<FeedId>>,
}

impl MemoryCursorStore {
    /// Store starting out with `initial`.
    pub fn new(initial: Option<FeedId>) -> Self {
        Self {
            cursor: Mutex::new(initial),
        }
    }

    /// Current value without going through the async trait.
    pub fn current(&self) -> Option<FeedId> {
        self.cursor.lock().expect("cursor lock poisoned").clone()
    }
}

impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<FeedId>, CursorStoreError> {
        Ok(self.current())
    }

    async fn save(&self, id: &FeedId) -> Result<(), CursorStoreError> {
        *self.cursor.lock().expect("cursor lock poisoned") = Some(id.clone());
        Ok(())
    }
}

/// The cursor backend chosen at configuration time.
pub enum CursorBackend {
    /// Text file with atomic replace.
    File(FileCursorStore),
    /// Single Redis key.
    #[cfg(feature = "connections")]
    Redis(crate::connections::cache_redis::RedisCursorStore),
    /// Process memory only.
    Memory(MemoryCursorStore),
}

impl CursorStore for CursorBackend {
    async fn load(&self) -> Result<Option<FeedId>, CursorStoreError> {
        match self {
            Self::File(store) => store.load().await,
            #[cfg(feature = "connections")]
            Self::Redis(store) => store.load().await,
            Self::Memory(store) => store.load().await,
        }
    }

    async fn save(&self, id: &FeedId) -> Result<(), CursorStoreError> {
        match self {
            Self::File(store) => store.save(id).await,
            #[cfg(feature = "connections")]
            Self::Redis(store) => store.save(id).await,
            Self::Memory(store) => store.save(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("state").join("cursor"));

        assert_eq!(store.load().await.unwrap(), None);
        store.save(&FeedId::new("a")).await.unwrap();
        store.save(&FeedId::new("b")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(FeedId::new("b")));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn blank_file_means_no_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(FileCursorStore::new(path).load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_keeps_last_value() {
        let store = MemoryCursorStore::default();
        store.save(&FeedId::new("x")).await.unwrap();
        assert_eq!(store.current(), Some(FeedId::new("x")));
    }
}

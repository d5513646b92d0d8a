//! # Connections Module
//!
//! Persistence of the global feed cursor. The file and memory backends are
//! always available; the Redis backend needs the `connections` feature.

/// Cursor trait, file and memory backends.
pub mod cursor_store;

/// Redis-backed cursor store.
#[cfg(feature = "connections")]
pub mod cache_redis;

pub use cursor_store::{CursorBackend, CursorStore, CursorStoreError, FileCursorStore, MemoryCursorStore};
#[cfg(feature = "connections")]
pub use cache_redis::RedisCursorStore;

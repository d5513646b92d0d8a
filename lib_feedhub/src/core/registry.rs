//! # Entity Log Registry
//!
//! Owns one [`VersionedEntityLog`] per live entity and a read-through cache of
//! archived snapshots for entities that are not live. The registry is an
//! ordinary value: the service builds it once, wraps it in an `Arc` and hands
//! it to the pollers and to whatever serves clients.
//!
//! Creation goes through the map's entry API while the map lock is held, so
//! concurrent first access to the same id yields a single log.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::core::entity_log::{LogError, LogSettings, VersionedEntityLog};
use crate::model::{EntityId, EntityUpdate};
use crate::sources::{Archive, ArchiveError};

/// Immutable view of an entity's history, keyed by version.
pub type Snapshot<T> = BTreeMap<u64, Arc<T>>;

/// Registry of per-entity logs plus the archive cache.
pub struct EntityLogRegistry<A, T = Value> {
    live: Mutex<HashMap<EntityId, Arc<VersionedEntityLog<T>>>>,
    historical: Mutex<HashMap<EntityId, Arc<OnceCell<Snapshot<T>>>>>,
    archive: A,
    settings: LogSettings,
}

impl<A, T> EntityLogRegistry<A, T>
where
    A: Archive<T>,
    T: Send + Sync + 'static,
{
    /// Creates an empty registry backed by `archive`.
    pub fn new(archive: A, settings: LogSettings) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            historical: Mutex::new(HashMap::new()),
            archive,
            settings,
        }
    }

    /// Returns the log for `entity_id`, creating an empty one on first use.
    ///
    /// Lookup and insertion happen under one lock, so callers racing on a
    /// new id all receive the same log.
    ///
    /// # Panics
    /// Panics if the registry lock was poisoned.
    pub fn log_for(&self, entity_id: &EntityId) -> Arc<VersionedEntityLog<T>> {
        let mut live = self.live.lock().expect("registry lock poisoned");
        let settings = self.settings;
        let log = live.entry(entity_id.clone()).or_insert_with(|| {
            info!(entity = %entity_id, "tracking new entity");
            Arc::new(VersionedEntityLog::new(entity_id.clone(), settings))
        });
        Arc::clone(log)
    }

    /// Returns the log for `entity_id` if one was created already.
    pub fn get(&self, entity_id: &EntityId) -> Option<Arc<VersionedEntityLog<T>>> {
        self.live
            .lock()
            .expect("registry lock poisoned")
            .get(entity_id)
            .cloned()
    }

    /// Routes one polled update into the entity's log.
    pub async fn apply(&self, update: EntityUpdate<T>) -> Result<bool, LogError> {
        let log = self.log_for(&update.entity_id);
        log.apply_update(update.version, update.payload).await
    }

    /// Full history of an entity. Live entities answer from their log;
    /// anything else is fetched from the archive once and cached. Archive
    /// errors are returned as-is and not cached.
    pub async fn historical_snapshot(&self, entity_id: &EntityId) -> Result<Snapshot<T>, ArchiveError> {
        if let Some(log) = self.get(entity_id) {
            return Ok(log.snapshot().await);
        }

        let cell = {
            let mut historical = self.historical.lock().expect("registry lock poisoned");
            Arc::clone(historical.entry(entity_id.clone()).or_default())
        };

        let loaded = cell
            .get_or_try_init(|| async {
                debug!(entity = %entity_id, "loading entity from archive");
                let raw = self.archive.historical_snapshot(entity_id).await?;
                Ok::<_, ArchiveError>(raw.into_iter().map(|(v, p)| (v, Arc::new(p))).collect())
            })
            .await;

        match loaded {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(e) => {
                // Forget the empty cell unless a concurrent lookup filled it.
                let mut historical = self.historical.lock().expect("registry lock poisoned");
                let stale = historical
                    .get(entity_id)
                    .is_some_and(|cached| Arc::ptr_eq(cached, &cell) && !cached.initialized());
                if stale {
                    historical.remove(entity_id);
                }
                Err(e)
            }
        }
    }

    /// Number of archived histories held in the cache.
    pub fn cached_histories(&self) -> usize {
        self.historical
            .lock()
            .expect("registry lock poisoned")
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Number of cache slots, including lookups still in flight.
    #[cfg(test)]
    fn cache_slots(&self) -> usize {
        self.historical.lock().expect("registry lock poisoned").len()
    }

    /// Ids of every live entity, sorted.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let live = self.live.lock().expect("registry lock poisoned");
        let mut ids: Vec<EntityId> = live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live.lock().expect("registry lock poisoned").len()
    }

    /// True when no entity is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

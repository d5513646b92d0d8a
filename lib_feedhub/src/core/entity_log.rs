//! # Versioned Entity Log
//!
//! One log per tracked entity. It stores a sparse, append-mostly array of
//! updates indexed by version number and republishes every accepted update to
//! the entity's topic.
//!
//! ## Rules
//!
//! - A populated slot is never replaced. A second delivery of a version that
//!   is already present is a no-op, which makes the log safe to feed with
//!   at-least-once upstream data.
//! - The slot array only grows. When a version lands at or past the end, the
//!   array is reallocated to `max(len, 1 + round(1.5 * version))`.
//! - All access goes through a [`PermitGate`]: snapshots and the duplicate
//!   check run under a read permit, mutation under the write permit. The
//!   inner `RwLock` is never contended; it only gives the gate something it
//!   can hand out shared or exclusive access to without `unsafe`.
//!
//! ## Publish ordering
//!
//! Publishing first tries a non-blocking send to every subscriber while the
//! write permit is held. Subscribers with a full buffer are retried with a
//! blocking send after the permit is released. Such a subscriber may
//! therefore see version `n + 1` (applied concurrently) before version `n`.
//! Consumers key on the version number and tolerate this.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::permit_gate::PermitGate;
use crate::core::topic::{Subscription, Topic};
use crate::model::EntityId;

/// Highest version accepted by default. Anything above is treated as a
/// malformed update.
pub const DEFAULT_MAX_VERSION: u64 = 1 << 20;

/// Errors raised while applying an update.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The version number is beyond what this log is willing to allocate.
    #[error("version {version} of entity {entity} exceeds the limit of {max}")]
    VersionOutOfRange {
        /// Entity the update was meant for.
        entity: EntityId,
        /// Offending version.
        version: u64,
        /// Configured ceiling.
        max: u64,
    },
}

/// An accepted update as seen by subscribers.
#[derive(Debug, PartialEq)]
pub struct LogEntry<T> {
    /// Version the payload was stored under.
    pub version: u64,
    /// Shared payload, the same allocation the log keeps.
    pub payload: Arc<T>,
}

/// Tuning knobs shared by every log a registry creates.
#[derive(Debug, Clone, Copy)]
pub struct LogSettings {
    /// Permits of each log's gate.
    pub gate_permits: u32,
    /// Buffer of each subscriber channel.
    pub subscriber_buffer: usize,
    /// Versions above this are rejected.
    pub max_version: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            gate_permits: crate::core::permit_gate::DEFAULT_PERMITS,
            subscriber_buffer: crate::core::topic::DEFAULT_SUBSCRIBER_BUFFER,
            max_version: DEFAULT_MAX_VERSION,
        }
    }
}

/// Per-entity versioned update log. See the module docs.
pub struct VersionedEntityLog<T = Value> {
    entity_id: EntityId,
    gate: PermitGate,
    slots: RwLock<Vec<Option<Arc<T>>>>,
    topic: Topic<LogEntry<T>>,
    max_version: u64,
}

/// Capacity after growing to make room for `version`.
pub fn grown_capacity(current: usize, version: u64) -> usize {
    // 1 + round(1.5 * v), rounding halves up
    let wanted = 1 + version + (version + 1) / 2;
    current.max(usize::try_from(wanted).unwrap_or(usize::MAX))
}

impl<T> VersionedEntityLog<T> {
    /// Creates an empty log.
    pub fn new(entity_id: EntityId, settings: LogSettings) -> Self {
        let topic = Topic::new(format!("entity:{}", entity_id), settings.subscriber_buffer, false);
        Self {
            entity_id,
            gate: PermitGate::new(settings.gate_permits),
            slots: RwLock::new(Vec::new()),
            topic,
            max_version: settings.max_version,
        }
    }

    /// The entity this log belongs to.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Copy of every populated slot, keyed by version.
    pub async fn snapshot(&self) -> BTreeMap<u64, Arc<T>> {
        let _read = self.gate.acquire_read().await;
        let slots = self.slots.read().expect("entity log slots poisoned");
        slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|p| (idx as u64, Arc::clone(p))))
            .collect()
    }

    /// Stores `payload` under `version` unless that version is already
    /// populated, then publishes it. Returns `Ok(true)` when the update was
    /// new.
    ///
    /// # Arguments
    /// * `version` - Position of the update in the entity's sequence. Any
    ///   order is accepted; gaps stay empty until filled.
    /// * `payload` - The update body, shared with subscribers through an `Arc`.
    ///
    /// # Errors
    /// Returns [`LogError::VersionOutOfRange`] when `version` is above the
    /// configured ceiling. Nothing is allocated in that case.
    ///
    /// # Panics
    /// Panics if the slot lock was poisoned by a panicking writer.
    pub async fn apply_update(&self, version: u64, payload: T) -> Result<bool, LogError> {
        if version > self.max_version {
            return Err(LogError::VersionOutOfRange {
                entity: self.entity_id.clone(),
                version,
                max: self.max_version,
            });
        }

        // 1. Cheap duplicate check under a shared permit
        let read = self.gate.acquire_read().await;
        if self.is_populated(version) {
            trace!(entity = %self.entity_id, version, "duplicate update ignored");
            return Ok(false);
        }

        // 2. Exclusive permit, then re-check: another writer may have won
        //    the race between the two permits
        let write = read.upgrade().await;
        if self.is_populated(version) {
            debug!(entity = %self.entity_id, version, "update applied concurrently, skipping");
            return Ok(false);
        }

        // 3. Grow if needed and store
        let payload = Arc::new(payload);
        {
            let mut slots = self.slots.write().expect("entity log slots poisoned");
            let idx = version as usize;
            if idx >= slots.len() {
                let new_len = grown_capacity(slots.len(), version);
                trace!(entity = %self.entity_id, from = slots.len(), to = new_len, "growing slots");
                slots.resize_with(new_len, || None);
            }
            slots[idx] = Some(Arc::clone(&payload));
        }

        // 4. Publish without waiting while exclusive, then release the gate
        //    before waiting on subscribers whose buffer was full
        let pending = self.topic.try_publish(Arc::new(LogEntry { version, payload }));
        drop(write);
        pending.deliver().await;

        debug!(entity = %self.entity_id, version, "update applied");
        Ok(true)
    }

    /// Receives every update accepted from now on. Combine with
    /// [`snapshot`](Self::snapshot) for the history.
    pub fn subscribe(&self) -> Subscription<LogEntry<T>> {
        self.topic.subscribe()
    }

    /// Number of populated slots.
    pub async fn len(&self) -> usize {
        let _read = self.gate.acquire_read().await;
        let slots = self.slots.read().expect("entity log slots poisoned");
        slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when no update was accepted yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Allocated slot count, populated or not.
    pub async fn capacity(&self) -> usize {
        let _read = self.gate.acquire_read().await;
        self.slots.read().expect("entity log slots poisoned").len()
    }

    /// Highest populated version.
    pub async fn latest_version(&self) -> Option<u64> {
        let _read = self.gate.acquire_read().await;
        let slots = self.slots.read().expect("entity log slots poisoned");
        slots.iter().rposition(|s| s.is_some()).map(|idx| idx as u64)
    }

    /// Caller must hold a permit.
    fn is_populated(&self, version: u64) -> bool {
        let slots = self.slots.read().expect("entity log slots poisoned");
        usize::try_from(version)
            .ok()
            .and_then(|idx| slots.get(idx))
            .is_some_and(|slot| slot.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> VersionedEntityLog {
        VersionedEntityLog::new(EntityId::new("game-1"), LogSettings::default())
    }

    #[test]
    fn capacity_grows_by_half_again() {
        assert_eq!(grown_capacity(0, 0), 1);
        assert_eq!(grown_capacity(0, 4), 7);
        assert_eq!(grown_capacity(0, 5), 9);
        assert_eq!(grown_capacity(100, 10), 100);
    }

    #[tokio::test]
    async fn repeat_delivery_is_a_no_op() {
        let log = log();
        let mut sub = log.subscribe();

        assert!(log.apply_update(3, json!({"inning": 1})).await.unwrap());
        let before = log.snapshot().await;
        assert!(!log.apply_update(3, json!({"inning": 9})).await.unwrap());
        let after = log.snapshot().await;

        assert_eq!(before, after);
        assert_eq!(*after[&3], json!({"inning": 1}));
        assert_eq!(sub.recv().await.unwrap().version, 3);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn slots_only_grow() {
        let log = log();
        log.apply_update(10, json!(10)).await.unwrap();
        let cap = log.capacity().await;
        assert_eq!(cap, 16);

        log.apply_update(2, json!(2)).await.unwrap();
        assert_eq!(log.capacity().await, cap);
        log.apply_update(16, json!(16)).await.unwrap();
        assert_eq!(log.capacity().await, 25);

        assert_eq!(log.len().await, 3);
        assert_eq!(log.latest_version().await, Some(16));
    }

    #[tokio::test]
    async fn oversized_version_is_rejected() {
        let log: VersionedEntityLog = VersionedEntityLog::new(
            EntityId::new("g"),
            LogSettings {
                max_version: 8,
                ..LogSettings::default()
            },
        );
        let err = log.apply_update(9, json!(null)).await.unwrap_err();
        assert!(matches!(err, LogError::VersionOutOfRange { version: 9, .. }));
        assert!(log.is_empty().await);
    }
}

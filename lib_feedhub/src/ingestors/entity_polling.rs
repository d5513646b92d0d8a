//! # Entity Polling Ingestor
//!
//! The second ingestion path. Every period it fetches the current snapshot of
//! each tracked entity, all of them concurrently, and routes every snapshot
//! through the [`EntityLogRegistry`]. Versions the log already holds are
//! ignored there, so re-polling an unchanged entity is harmless.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::registry::EntityLogRegistry;
use crate::model::EntityId;
use crate::sources::{Archive, UpstreamFeed};

/// Tally of one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Snapshots that added a new version.
    pub applied: usize,
    /// Snapshots whose version was already known.
    pub unchanged: usize,
    /// Fetches or applications that failed.
    pub failed: usize,
}

/// Periodic per-entity snapshot poller.
pub struct EntityPoller<U, A, C> {
    upstream: Arc<U>,
    registry: Arc<EntityLogRegistry<A>>,
    clock: Arc<C>,
    period: Duration,
    tracked: Mutex<BTreeSet<EntityId>>,
}

impl<U, A, C> EntityPoller<U, A, C>
where
    U: UpstreamFeed,
    A: Archive<Value>,
    C: Clock,
{
    /// Poller with nothing tracked yet.
    pub fn new(upstream: Arc<U>, registry: Arc<EntityLogRegistry<A>>, clock: Arc<C>, period: Duration) -> Self {
        Self {
            upstream,
            registry,
            clock,
            period,
            tracked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Starts polling `entity_id`. Returns `false` if it was already tracked.
    pub fn track(&self, entity_id: EntityId) -> bool {
        self.tracked.lock().expect("tracked set lock poisoned").insert(entity_id)
    }

    /// Stops polling `entity_id`. Its log stays in the registry.
    pub fn untrack(&self, entity_id: &EntityId) -> bool {
        self.tracked.lock().expect("tracked set lock poisoned").remove(entity_id)
    }

    /// Tracked ids, sorted.
    pub fn tracked(&self) -> Vec<EntityId> {
        self.tracked
            .lock()
            .expect("tracked set lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// One polling round over every tracked entity.
    ///
    /// A failure for one entity is counted in [`PollReport::failed`] and
    /// logged; it never stops the round.
    pub async fn poll_once(&self) -> PollReport {
        // 1. Fetch every tracked entity at once
        let ids = self.tracked();
        let fetches = ids.iter().map(|id| async move { (id, self.upstream.fetch_entity_update(id).await) });
        let results = join_all(fetches).await;

        // 2. Apply one by one; the logs drop versions they already hold
        let mut report = PollReport::default();
        for (id, result) in results {
            let update = match result {
                Ok(update) => update,
                Err(e) => {
                    warn!(entity = %id, error = %e, "entity fetch failed");
                    report.failed += 1;
                    continue;
                }
            };
            if &update.entity_id != id {
                warn!(entity = %id, got = %update.entity_id, "upstream answered for another entity");
                report.failed += 1;
                continue;
            }

            let version = update.version;
            match self.registry.apply(update).await {
                Ok(true) => {
                    debug!(entity = %id, version, "entity update applied");
                    report.applied += 1;
                }
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    warn!(entity = %id, error = %e, "entity update rejected");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Polls every period until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(period_ms = self.period.as_millis() as u64, "entity poller started");
        loop {
            let started = self.clock.now();
            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.poll_once() => report,
            };
            if report.applied > 0 || report.failed > 0 {
                info!(applied = report.applied, failed = report.failed, "entity poll complete");
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.period.saturating_sub(elapsed)) => {}
            }
        }
        info!("entity poller stopped");
    }
}

//! # Feed Polling Ingestor
//!
//! The self-scheduling loop that keeps the global feed flowing: it wakes on a
//! fixed cadence, asks the [`CatchUpFetcher`] for everything past the cursor,
//! fans the new items out through the [`TypedFanoutBus`] and persists the
//! advanced cursor.
//!
//! ## Cycle:
//! - **Idle**: waiting for the next tick.
//! - **Fetching**: catch-up search against the upstream.
//! - **Publishing**: new items go to the bus, oldest first.
//! - **Persisting**: the in-memory cursor moves and is written to the store.
//!
//! A failed fetch sends the loop back to `Idle` after a short backoff with
//! jitter instead of a full period. A failed save is logged; the in-memory
//! cursor keeps its new value.
//!
//! The stored cursor is read before the first cycle. If the store cannot be
//! read, the cycle fails like a fetch would and the read is retried on the
//! next one. Only an empty store leads to a cold start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connections::{CursorStore, CursorStoreError};
use crate::core::clock::Clock;
use crate::core::fanout::TypedFanoutBus;
use crate::ingestors::catch_up::CatchUpFetcher;
use crate::model::FeedId;
use crate::sources::{UpstreamError, UpstreamFeed};

/// Where the loop is within its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    /// Waiting for the next tick.
    Idle,
    /// Catch-up search in flight.
    Fetching,
    /// Handing items to the bus.
    Publishing,
    /// Writing the cursor.
    Persisting,
}

/// Why a cycle published nothing.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The stored cursor could not be read, so the resume point is unknown.
    #[error("cursor could not be restored: {0}")]
    CursorLoad(#[from] CursorStoreError),
    /// The catch-up search failed upstream.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Cadence of the loop.
#[derive(Debug, Clone, Copy)]
pub struct IngestionSettings {
    /// Time between the starts of two cycles.
    pub period: Duration,
    /// Base wait after a failed fetch.
    pub error_backoff: Duration,
    /// Upper bound of the random extra wait after a failed fetch.
    pub max_jitter: Duration,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            error_backoff: Duration::from_millis(500),
            max_jitter: Duration::from_millis(100),
        }
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items handed to the bus.
    pub published: usize,
    /// Upstream requests made by the catch-up search.
    pub fetches: usize,
    /// The cursor could not be found upstream.
    pub gap: bool,
    /// The cursor moved and the store accepted it.
    pub persisted: bool,
}

/// # Ingestion Loop
///
/// Owns the global cursor. Only one loop should run per cursor store.
pub struct IngestionLoop<U, S, C> {
    upstream: Arc<U>,
    store: S,
    clock: Arc<C>,
    bus: Arc<TypedFanoutBus>,
    fetcher: CatchUpFetcher,
    settings: IngestionSettings,
    state: Mutex<IngestionState>,
    cursor: Mutex<Option<FeedId>>,
    restored: AtomicBool,
}

impl<U, S, C> IngestionLoop<U, S, C>
where
    U: UpstreamFeed,
    S: CursorStore,
    C: Clock,
{
    /// Wires the loop. The cursor is read from `store` on the first cycle.
    pub fn new(
        upstream: Arc<U>,
        store: S,
        clock: Arc<C>,
        bus: Arc<TypedFanoutBus>,
        fetcher: CatchUpFetcher,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            upstream,
            store,
            clock,
            bus,
            fetcher,
            settings,
            state: Mutex::new(IngestionState::Idle),
            cursor: Mutex::new(None),
            restored: AtomicBool::new(false),
        }
    }

    /// Current phase of the cycle.
    pub fn current_state(&self) -> IngestionState {
        *self.state.lock().expect("ingestion state lock poisoned")
    }

    /// Id of the newest item published so far.
    pub fn cursor(&self) -> Option<FeedId> {
        self.cursor.lock().expect("ingestion cursor lock poisoned").clone()
    }

    /// The cursor store in use.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// # Main Execution Loop
    ///
    /// Runs cycles until `cancel` fires. A cycle that is still fetching when
    /// cancellation arrives is abandoned and commits nothing.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(period_ms = self.settings.period.as_millis() as u64, "ingestion loop started");

        loop {
            let started = self.clock.now();
            let cycle = tokio::select! {
                _ = cancel.cancelled() => break,
                cycle = self.run_once() => cycle,
            };

            let delay = match cycle {
                Ok(report) => {
                    if report.published > 0 {
                        info!(
                            published = report.published,
                            fetches = report.fetches,
                            persisted = report.persisted,
                            "feed cycle complete"
                        );
                    }
                    let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
                    self.settings.period.saturating_sub(elapsed)
                }
                Err(e) => {
                    let delay = self.error_delay();
                    warn!(error = %e, retry_ms = delay.as_millis() as u64, "feed cycle failed");
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(delay) => {}
            }
        }

        self.set_state(IngestionState::Idle);
        info!(cursor = ?self.cursor(), "ingestion loop stopped");
    }

    /// Executes a single cycle.
    ///
    /// # Errors
    ///
    /// - [`IngestionError::CursorLoad`] when the stored cursor has not been
    ///   read yet and the store fails. Nothing is fetched and the next call
    ///   tries the store again.
    /// - [`IngestionError::Upstream`] when the catch-up search fails. The
    ///   cursor is unchanged.
    pub async fn run_once(&self) -> Result<CycleReport, IngestionError> {
        self.restore_cursor().await?;
        let last_seen = self.cursor();

        self.set_state(IngestionState::Fetching);
        let outcome = match self.fetcher.fetch_new(self.upstream.as_ref(), last_seen.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(IngestionState::Idle);
                return Err(e.into());
            }
        };

        self.set_state(IngestionState::Publishing);
        let published = outcome.items.len();
        for item in outcome.items {
            self.bus.publish(Arc::new(item));
        }

        let mut report = CycleReport {
            published,
            fetches: outcome.fetches,
            gap: outcome.gap,
            persisted: false,
        };

        if let Some(next) = outcome.cursor.filter(|next| last_seen.as_ref() != Some(next)) {
            self.set_state(IngestionState::Persisting);
            *self.cursor.lock().expect("ingestion cursor lock poisoned") = Some(next.clone());
            match self.store.save(&next).await {
                Ok(()) => report.persisted = true,
                Err(e) => error!(error = %e, cursor = %next, "failed to persist cursor"),
            }
        }

        self.set_state(IngestionState::Idle);
        Ok(report)
    }

    /// Loads the persisted cursor until one load succeeds. Only an empty
    /// store means a cold start.
    async fn restore_cursor(&self) -> Result<(), CursorStoreError> {
        if self.restored.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.store.load().await? {
            Some(id) => {
                debug!(cursor = %id, "cursor restored");
                *self.cursor.lock().expect("ingestion cursor lock poisoned") = Some(id);
            }
            None => debug!("no stored cursor, cold start"),
        }
        self.restored.store(true, Ordering::Release);
        Ok(())
    }

    fn error_delay(&self) -> Duration {
        let max = self.settings.max_jitter.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=max);
        self.settings.error_backoff + Duration::from_millis(jitter)
    }

    fn set_state(&self, next: IngestionState) {
        *self.state.lock().expect("ingestion state lock poisoned") = next;
    }
}

//! # Catch-up Fetcher
//!
//! Works out which part of the upstream feed has not been delivered yet.
//!
//! The upstream only serves "the N most recent items", newest first, so the
//! fetcher searches backward from the head of the feed with a window that
//! doubles on every round:
//!
//! 1. **Cold start** (no cursor): take the `cold_batch` most recent items and
//!    treat all of them as new.
//! 2. **Warm resume**: starting from `initial_limit`, double the window and
//!    fetch, until the cursor shows up in the older half of the window or the
//!    next window would exceed `max_limit`. Everything strictly after the
//!    cursor in the last window is new.
//! 3. **Gap**: if the cursor never shows up, the upstream has moved further
//!    than the largest window can see. Nothing is emitted and the cursor is
//!    left where it was; the next cycle tries again.
//!
//! An upstream that answers with fewer items than asked for has no older
//! history to offer, so the search stops there too.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::model::{FeedId, FeedItem};
use crate::sources::{UpstreamError, UpstreamFeed};

/// Window sizes of the backward search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpConfig {
    /// Items fetched when there is no cursor.
    pub cold_batch: usize,
    /// Window the doubling starts from. The first fetch asks for twice this.
    pub initial_limit: usize,
    /// Largest window ever requested.
    pub max_limit: usize,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            cold_batch: 100,
            initial_limit: 50,
            max_limit: 2000,
        }
    }
}

/// Result of one catch-up search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatchUpOutcome {
    /// Unseen items, oldest first, each id at most once.
    pub items: Vec<FeedItem>,
    /// Cursor after emitting `items`. Unchanged when nothing is new.
    pub cursor: Option<FeedId>,
    /// Upstream requests made.
    pub fetches: usize,
    /// The cursor was not found in any window.
    pub gap: bool,
}

/// Backward doubling search over the upstream feed. See the module docs.
#[derive(Debug, Clone, Default)]
pub struct CatchUpFetcher {
    config: CatchUpConfig,
}

impl CatchUpFetcher {
    /// Fetcher using `config` window sizes.
    pub fn new(config: CatchUpConfig) -> Self {
        Self { config }
    }

    /// Window sizes in use.
    pub fn config(&self) -> CatchUpConfig {
        self.config
    }

    /// Finds the items after `last_seen`, or bootstraps when it is `None`.
    ///
    /// # Arguments
    /// * `upstream` - The feed to search. Every round is one
    ///   [`UpstreamFeed::fetch_recent`] call.
    /// * `last_seen` - Id of the newest item already delivered, if any.
    ///
    /// # Returns
    /// The new items oldest first, the cursor to store next, the number of
    /// upstream calls made and whether the cursor was lost upstream.
    ///
    /// # Errors
    /// Upstream failures are returned as-is; nothing is emitted and the
    /// caller keeps its cursor.
    pub async fn fetch_new<U>(&self, upstream: &U, last_seen: Option<&FeedId>) -> Result<CatchUpOutcome, UpstreamError>
    where
        U: UpstreamFeed + ?Sized,
    {
        match last_seen {
            None => self.cold_start(upstream).await,
            Some(cursor) => self.resume(upstream, cursor).await,
        }
    }

    async fn cold_start<U>(&self, upstream: &U) -> Result<CatchUpOutcome, UpstreamError>
    where
        U: UpstreamFeed + ?Sized,
    {
        let mut window = upstream.fetch_recent(self.config.cold_batch).await?;
        window.reverse();

        let items = dedupe(window, None);
        let cursor = items.last().map(|item| item.id.clone());
        debug!(items = items.len(), "cold start");
        Ok(CatchUpOutcome {
            items,
            cursor,
            fetches: 1,
            gap: false,
        })
    }

    async fn resume<U>(&self, upstream: &U, cursor: &FeedId) -> Result<CatchUpOutcome, UpstreamError>
    where
        U: UpstreamFeed + ?Sized,
    {
        let mut limit = self.config.initial_limit.max(1);
        let mut fetches = 0;
        let mut window: Vec<FeedItem> = Vec::new();
        let mut position = None;

        loop {
            // 1. Double the window, stopping at the cap
            let next = limit.saturating_mul(2);
            if next > self.config.max_limit {
                break;
            }
            limit = next;

            // 2. Fetch and turn the page into chronological order
            window = upstream.fetch_recent(limit).await?;
            fetches += 1;
            window.reverse();

            // 3. Locate the cursor, scanning from the newest end so a
            //    duplicated cursor id resolves to its latest occurrence
            position = window.iter().rposition(|item| &item.id == cursor);
            // 4. Older half found, or no older history left: stop
            let exhausted = window.len() < limit;
            match position {
                Some(p) if p < limit / 2 => break,
                _ if exhausted => break,
                _ => {}
            }
        }

        let Some(p) = position else {
            warn!(cursor = %cursor, fetches, "cursor not found upstream, skipping cycle");
            return Ok(CatchUpOutcome {
                items: Vec::new(),
                cursor: Some(cursor.clone()),
                fetches,
                gap: true,
            });
        };

        let items = dedupe(window.split_off(p + 1), Some(cursor));
        let next_cursor = items
            .last()
            .map(|item| item.id.clone())
            .unwrap_or_else(|| cursor.clone());
        debug!(cursor = %next_cursor, items = items.len(), fetches, "caught up");
        Ok(CatchUpOutcome {
            items,
            cursor: Some(next_cursor),
            fetches,
            gap: false,
        })
    }
}

/// Keeps the first occurrence of each id and drops `skip`.
fn dedupe(items: Vec<FeedItem>, skip: Option<&FeedId>) -> Vec<FeedItem> {
    let mut seen: HashSet<FeedId> = skip.into_iter().cloned().collect();
    items.into_iter().filter(|item| seen.insert(item.id.clone())).collect()
}

//! # Permit Gate
//!
//! A counting many-readers / one-writer gate built on a fair
//! `tokio::sync::Semaphore` holding `N` permits:
//!
//! - a reader takes one permit, so up to `N` readers run side by side;
//! - a writer takes all `N` permits at once, which excludes every reader and
//!   every other writer.
//!
//! Tokio queues waiters in FIFO order and hands out a multi-permit request
//! atomically, so a waiting writer holds back readers that arrive after it and
//! a cancelled waiter gives back whatever it had been assigned. Acquisition
//! never fails; it only suspends the calling task.
//!
//! Moving between the two modes goes through [`ReadPermit::upgrade`] and
//! [`WritePermit::downgrade`]. Both release first and acquire second, so they
//! cannot deadlock against each other, but another writer may slip in between.
//! Anything checked under the read permit has to be checked again once the
//! write permit is held.

use std::future::Future;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Permits handed out when the caller does not pick a capacity.
pub const DEFAULT_PERMITS: u32 = 64;

/// Many-readers / one-writer gate. See the module docs.
#[derive(Debug)]
pub struct PermitGate {
    semaphore: Semaphore,
    total: u32,
}

/// A shared permit. Released on drop.
#[derive(Debug)]
#[must_use = "the read permit is released as soon as it is dropped"]
pub struct ReadPermit<'a> {
    gate: &'a PermitGate,
    _permit: SemaphorePermit<'a>,
}

/// The exclusive permit. Released on drop.
#[derive(Debug)]
#[must_use = "the write permit is released as soon as it is dropped"]
pub struct WritePermit<'a> {
    gate: &'a PermitGate,
    _permit: SemaphorePermit<'a>,
}

impl PermitGate {
    /// Creates a gate with `permits` read slots. A value of zero is bumped to
    /// one so that a writer can always make progress.
    pub fn new(permits: u32) -> Self {
        let total = permits.max(1);
        Self {
            semaphore: Semaphore::new(total as usize),
            total,
        }
    }

    /// Total number of permits, which is also the maximum number of
    /// concurrent readers.
    pub fn total_permits(&self) -> u32 {
        self.total
    }

    /// Permits currently free. Equal to [`total_permits`](Self::total_permits)
    /// when nobody holds the gate.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a shared permit.
    pub async fn acquire_read(&self) -> ReadPermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("permit gate semaphore is never closed");
        ReadPermit {
            gate: self,
            _permit: permit,
        }
    }

    /// Waits until every permit is free and takes them all.
    pub async fn acquire_write(&self) -> WritePermit<'_> {
        let permit = self
            .semaphore
            .acquire_many(self.total)
            .await
            .expect("permit gate semaphore is never closed");
        WritePermit {
            gate: self,
            _permit: permit,
        }
    }

    /// Runs `f` while holding a read permit. The permit is released when the
    /// returned future completes, errors out through `?`, or is dropped.
    pub async fn with_read<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let _permit = self.acquire_read().await;
        f().await
    }

    /// Runs `f` while holding the write permit. Same release guarantees as
    /// [`with_read`](Self::with_read).
    pub async fn with_write<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let _permit = self.acquire_write().await;
        f().await
    }
}

impl Default for PermitGate {
    fn default() -> Self {
        Self::new(DEFAULT_PERMITS)
    }
}

impl<'a> ReadPermit<'a> {
    /// Gives the read permit back, then waits for the write permit.
    pub async fn upgrade(self) -> WritePermit<'a> {
        let gate = self.gate;
        drop(self);
        gate.acquire_write().await
    }
}

impl<'a> WritePermit<'a> {
    /// Gives the write permit back, then waits for a read permit.
    pub async fn downgrade(self) -> ReadPermit<'a> {
        let gate = self.gate;
        drop(self);
        gate.acquire_read().await
    }
}

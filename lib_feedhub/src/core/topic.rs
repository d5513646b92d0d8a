//! # Topic: Zero-Copy Fan-out to Bounded Subscribers
//!
//! A `Topic` is a named broadcast destination. Every subscriber owns a
//! bounded MPSC channel; publishing wraps the item in an `Arc` once and hands
//! each subscriber a pointer to the same allocation, so fan-out cost does not
//! depend on payload size.
//!
//! Two publish paths exist because the two audiences want different things:
//!
//! 1.  **Lossy** ([`Topic::publish_lossy`]): never waits. A subscriber whose
//!     buffer is full misses the item (drop-newest) and the miss is counted on
//!     its [`Subscription`]. Used by the typed feed bus.
//! 2.  **Two-phase** ([`Topic::try_publish`] + [`PendingDelivery::deliver`]):
//!     the first phase never waits and returns whatever could not be
//!     delivered; the second phase waits for buffer space. The entity logs run
//!     the first phase under their write permit and the second after releasing
//!     it, so nothing is dropped and the exclusive section stays short.
//!
//! Subscribers whose receiver is gone are pruned on the next publish.
//!
//! With `retain_latest` the topic remembers the most recent item and replays
//! it to each new subscriber before any live item. Without it, a publish to a
//! topic nobody listens to is simply discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};

/// Buffer size of a subscriber channel when the caller does not pick one.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Per-subscriber bookkeeping held by the topic.
struct SubscriberHandle<T> {
    id: u64,
    sender: mpsc::Sender<Arc<T>>,
    dropped: Arc<AtomicU64>,
}

struct TopicInner<T> {
    subscribers: Vec<SubscriberHandle<T>>,
    latest: Option<Arc<T>>,
}

/// A named broadcast destination. See the module docs.
pub struct Topic<T> {
    name: String,
    buffer: usize,
    retain_latest: bool,
    next_id: AtomicU64,
    inner: Mutex<TopicInner<T>>,
}

/// Receiving end handed to a subscriber.
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    topic: String,
    receiver: mpsc::Receiver<Arc<T>>,
    dropped: Arc<AtomicU64>,
}

/// Items the non-blocking phase of [`Topic::try_publish`] could not hand
/// over because the subscriber's buffer was full.
#[must_use = "pending items are lost unless `deliver` is awaited"]
pub struct PendingDelivery<T> {
    topic: String,
    items: Vec<(mpsc::Sender<Arc<T>>, Arc<T>)>,
}

impl<T> Topic<T> {
    /// Creates an empty topic.
    pub fn new(name: impl Into<String>, buffer: usize, retain_latest: bool) -> Self {
        Self {
            name: name.into(),
            buffer: buffer.max(1),
            retain_latest,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(TopicInner {
                subscribers: Vec::new(),
                latest: None,
            }),
        }
    }

    /// Topic name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of subscribers registered (including ones not yet pruned).
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("topic lock poisoned").subscribers.len()
    }

    /// The retained item, if this topic keeps one.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.inner.lock().expect("topic lock poisoned").latest.clone()
    }

    /// Registers a new subscriber. It receives every item published from now
    /// on, preceded by the retained item when `retain_latest` is set.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut inner = self.inner.lock().expect("topic lock poisoned");
        if let Some(latest) = &inner.latest {
            // Fresh channel with capacity >= 1, cannot be full.
            let _ = tx.try_send(Arc::clone(latest));
        }
        inner.subscribers.push(SubscriberHandle {
            id,
            sender: tx,
            dropped: Arc::clone(&dropped),
        });
        debug!(topic = %self.name, subscriber = id, "subscriber registered");

        Subscription {
            id,
            topic: self.name.clone(),
            receiver: rx,
            dropped,
        }
    }

    /// Best-effort delivery that never waits. Returns how many subscribers
    /// accepted the item.
    pub fn publish_lossy(&self, item: Arc<T>) -> usize {
        let mut delivered = 0;
        let mut inner = self.inner.lock().expect("topic lock poisoned");
        if self.retain_latest {
            inner.latest = Some(Arc::clone(&item));
        }

        let name = &self.name;
        inner.subscribers.retain(|sub| match sub.sender.try_send(Arc::clone(&item)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(topic = %name, subscriber = sub.id, dropped = total, "subscriber buffer full, item dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(topic = %name, subscriber = sub.id, "subscriber gone, pruning");
                false
            }
        });
        delivered
    }

    /// First, non-blocking phase of a lossless publish. Everything that did
    /// not fit is returned for [`PendingDelivery::deliver`].
    pub fn try_publish(&self, item: Arc<T>) -> PendingDelivery<T> {
        let mut pending = Vec::new();
        let mut inner = self.inner.lock().expect("topic lock poisoned");
        if self.retain_latest {
            inner.latest = Some(Arc::clone(&item));
        }

        let name = &self.name;
        inner.subscribers.retain(|sub| match sub.sender.try_send(Arc::clone(&item)) {
            Ok(()) => true,
            Err(TrySendError::Full(item)) => {
                pending.push((sub.sender.clone(), item));
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(topic = %name, subscriber = sub.id, "subscriber gone, pruning");
                false
            }
        });

        PendingDelivery {
            topic: self.name.clone(),
            items: pending,
        }
    }
}

impl<T> PendingDelivery<T> {
    /// True when the non-blocking phase delivered to everyone.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of subscribers still waiting for the item.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Second phase: waits for buffer space at each lagging subscriber.
    /// Subscribers that disappear meanwhile are skipped.
    pub async fn deliver(self) {
        if self.items.is_empty() {
            return;
        }
        debug!(topic = %self.topic, lagging = self.items.len(), "falling back to blocking delivery");
        for (sender, item) in self.items {
            let _ = sender.send(item).await;
        }
    }
}

impl<T> Subscription<T> {
    /// Waits for the next item. `None` once the topic is gone and the buffer
    /// is drained.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }

    /// Returns a buffered item without waiting.
    pub fn try_recv(&mut self) -> Result<Arc<T>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Items this subscriber missed because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Subscriber id, unique within its topic.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the topic this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lossy_publish_counts_drops_on_full_buffer() {
        let topic = Topic::new("t", 1, false);
        let mut sub = topic.subscribe();

        assert_eq!(topic.publish_lossy(Arc::new(1)), 1);
        assert_eq!(topic.publish_lossy(Arc::new(2)), 0);

        assert_eq!(*sub.recv().await.unwrap(), 1);
        assert_eq!(sub.dropped(), 1);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let topic = Topic::new("t", 4, false);
        let sub = topic.subscribe();
        let _keep = topic.subscribe();
        drop(sub);

        topic.publish_lossy(Arc::new("x"));
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn retained_item_is_replayed_to_late_subscriber() {
        let topic = Topic::new("t", 4, true);
        topic.publish_lossy(Arc::new(1));
        topic.publish_lossy(Arc::new(2));

        let mut late = topic.subscribe();
        assert_eq!(*late.recv().await.unwrap(), 2);
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_subscriber_no_history() {
        let topic = Topic::new("t", 4, false);
        topic.publish_lossy(Arc::new(1));
        let mut sub = topic.subscribe();
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn two_phase_publish_returns_and_delivers_leftovers() {
        let topic = Topic::new("t", 1, false);
        let mut sub = topic.subscribe();

        assert!(topic.try_publish(Arc::new(1)).is_empty());
        let pending = topic.try_publish(Arc::new(2));
        assert_eq!(pending.len(), 1);

        let deliver = tokio::spawn(pending.deliver());
        assert_eq!(*sub.recv().await.unwrap(), 1);
        assert_eq!(*sub.recv().await.unwrap(), 2);
        deliver.await.unwrap();
        assert_eq!(sub.dropped(), 0);
    }
}

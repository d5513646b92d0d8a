//! # Typed Fan-out Bus
//!
//! Routes every accepted feed item to two audiences: the global topic, which
//! sees everything, and the topic of the item's classification, which only
//! sees items of that type. Classification topics are created the first time
//! anyone publishes to or subscribes to them.
//!
//! Delivery is best effort and never pushes back on the ingestion loop. A
//! subscriber that falls behind by more than its buffer loses the newest
//! items until it catches up; the loss is visible through
//! [`Subscription::dropped`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::core::topic::{Subscription, Topic, DEFAULT_SUBSCRIBER_BUFFER};
use crate::model::{Classification, FeedItem};

/// Topic settings applied to the global topic and every typed topic.
#[derive(Debug, Clone, Copy)]
pub struct FanoutSettings {
    /// Per-subscriber buffer.
    pub subscriber_buffer: usize,
    /// Replay the most recent item to new subscribers.
    pub retain_latest: bool,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            retain_latest: true,
        }
    }
}

/// Global plus per-classification broadcast of feed items.
pub struct TypedFanoutBus {
    settings: FanoutSettings,
    global: Topic<FeedItem>,
    typed: Mutex<HashMap<Classification, Arc<Topic<FeedItem>>>>,
}

impl TypedFanoutBus {
    /// Creates a bus with no typed topics yet.
    pub fn new(settings: FanoutSettings) -> Self {
        Self {
            settings,
            global: Topic::new("feed:global", settings.subscriber_buffer, settings.retain_latest),
            typed: Mutex::new(HashMap::new()),
        }
    }

    /// Sends `item` to the global topic and to its classification's topic.
    pub fn publish(&self, item: Arc<FeedItem>) {
        let classification = item.classification.clone();
        let global = self.publish_global(Arc::clone(&item));
        let typed = self.publish_typed(&classification, item);
        trace!(%classification, global, typed, "feed item fanned out");
    }

    /// Sends `item` to the global topic only. Returns the number of
    /// subscribers that took it.
    pub fn publish_global(&self, item: Arc<FeedItem>) -> usize {
        self.global.publish_lossy(item)
    }

    /// Sends `item` to the topic of `classification` only.
    pub fn publish_typed(&self, classification: &Classification, item: Arc<FeedItem>) -> usize {
        self.topic_for(classification).publish_lossy(item)
    }

    /// Every item, whatever its type.
    pub fn subscribe_global(&self) -> Subscription<FeedItem> {
        self.global.subscribe()
    }

    /// Items of one classification.
    pub fn subscribe_typed(&self, classification: &Classification) -> Subscription<FeedItem> {
        self.topic_for(classification).subscribe()
    }

    /// Classifications that have a topic, sorted.
    pub fn classifications(&self) -> Vec<Classification> {
        let typed = self.typed.lock().expect("fanout lock poisoned");
        let mut kinds: Vec<Classification> = typed.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn topic_for(&self, classification: &Classification) -> Arc<Topic<FeedItem>> {
        let mut typed = self.typed.lock().expect("fanout lock poisoned");
        let settings = self.settings;
        let topic = typed.entry(classification.clone()).or_insert_with(|| {
            debug!(%classification, "creating typed topic");
            Arc::new(Topic::new(
                format!("feed:type:{}", classification),
                settings.subscriber_buffer,
                settings.retain_latest,
            ))
        });
        Arc::clone(topic)
    }
}

impl Default for TypedFanoutBus {
    fn default() -> Self {
        Self::new(FanoutSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typed_topics_are_isolated() {
        let bus = TypedFanoutBus::new(FanoutSettings {
            retain_latest: false,
            ..FanoutSettings::default()
        });
        let mut all = bus.subscribe_global();
        let mut x = bus.subscribe_typed(&Classification::new("X"));
        let mut y = bus.subscribe_typed(&Classification::new("Y"));

        bus.publish(Arc::new(FeedItem::new("1", "X")));
        bus.publish(Arc::new(FeedItem::new("2", "Y")));

        assert_eq!(all.recv().await.unwrap().id.as_str(), "1");
        assert_eq!(all.recv().await.unwrap().id.as_str(), "2");
        assert_eq!(x.recv().await.unwrap().id.as_str(), "1");
        assert!(x.try_recv().is_err());
        assert_eq!(y.recv().await.unwrap().id.as_str(), "2");
        assert!(y.try_recv().is_err());
        assert_eq!(bus.classifications(), vec![Classification::new("X"), Classification::new("Y")]);
    }

    #[tokio::test]
    async fn late_subscriber_gets_latest_of_its_type() {
        let bus = TypedFanoutBus::default();
        bus.publish(Arc::new(FeedItem::new("1", "X")));
        bus.publish(Arc::new(FeedItem::new("2", "Y")));

        let mut x = bus.subscribe_typed(&Classification::new("X"));
        assert_eq!(x.recv().await.unwrap().id.as_str(), "1");
        let mut all = bus.subscribe_global();
        assert_eq!(all.recv().await.unwrap().id.as_str(), "2");
    }
}

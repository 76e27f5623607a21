//! Per-topic change feeds.
//!
//! Every store write is announced on the topic it touched. Subscribers
//! re-read the affected query, standing in for a reactive remote
//! subscription. Uses tokio broadcast channels for O(1) send to all
//! subscribers; each receiver buffers up to `capacity` messages and a lagging
//! receiver loses the oldest ones.

use folio_core::{DocId, DocumentId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// A queryable slice of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Pages(DocumentId),
    Threads(DocId),
    Presence(DocId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Pages(id) => write!(f, "pages:{id}"),
            Topic::Threads(id) => write!(f, "threads:{id}"),
            Topic::Presence(id) => write!(f, "presence:{id}"),
        }
    }
}

/// What changed. Carries no rows: subscribers re-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    PagesChanged(DocumentId),
    ThreadsChanged(DocId),
    PresenceChanged(DocId),
}

impl StoreEvent {
    pub fn topic(&self) -> Topic {
        match self {
            StoreEvent::PagesChanged(id) => Topic::Pages(id.clone()),
            StoreEvent::ThreadsChanged(id) => Topic::Threads(id.clone()),
            StoreEvent::PresenceChanged(id) => Topic::Presence(id.clone()),
        }
    }
}

/// Statistics for monitoring feed health.
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    pub messages_sent: u64,
    /// Sends that found no subscriber.
    pub messages_dropped: u64,
    pub subscribers: usize,
}

struct AtomicFeedStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A broadcast group for a single topic.
pub struct FeedGroup<T> {
    sender: broadcast::Sender<T>,
    capacity: usize,
    stats: AtomicFeedStats,
}

impl<T: Clone> FeedGroup<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            stats: AtomicFeedStats {
                messages_sent: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
            },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn publish(&self, msg: T) -> usize {
        match self.sender.send(msg) {
            Ok(count) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                count
            }
            Err(_) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Maps topics to feed groups so that messages stay isolated per topic.
pub struct FeedHub<K, T> {
    groups: RwLock<HashMap<K, Arc<FeedGroup<T>>>>,
    default_capacity: usize,
}

impl<K, T> FeedHub<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new(default_capacity: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `key`.
    pub async fn get_or_create(&self, key: &K) -> Arc<FeedGroup<T>> {
        // Fast path: read lock
        {
            let groups = self.groups.read().await;
            if let Some(group) = groups.get(key) {
                return group.clone();
            }
        }

        let mut groups = self.groups.write().await;
        // Double-check after acquiring write lock
        if let Some(group) = groups.get(key) {
            return group.clone();
        }

        let group = Arc::new(FeedGroup::new(self.default_capacity));
        groups.insert(key.clone(), group.clone());
        group
    }

    pub async fn subscribe(&self, key: &K) -> broadcast::Receiver<T> {
        self.get_or_create(key).await.subscribe()
    }

    /// Publish to an existing group. Topics nobody ever subscribed to are skipped.
    pub async fn publish(&self, key: &K, msg: T) -> usize {
        let group = self.groups.read().await.get(key).cloned();
        match group {
            Some(group) => group.publish(msg),
            None => 0,
        }
    }

    /// Drop a group once its last subscriber is gone.
    pub async fn remove_if_unused(&self, key: &K) -> bool {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get(key) {
            if group.subscriber_count() == 0 {
                groups.remove(key);
                return true;
            }
        }
        false
    }

    pub async fn topic_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn stats(&self, key: &K) -> Option<FeedStats> {
        self.groups.read().await.get(key).map(|g| g.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threads(id: &str) -> Topic {
        Topic::Threads(DocId::from(id))
    }

    #[tokio::test]
    async fn test_feed_fan_out() {
        let group = FeedGroup::new(16);
        let mut rx1 = group.subscribe();
        let mut rx2 = group.subscribe();

        let count = group.publish(StoreEvent::ThreadsChanged(DocId::from("d1")));
        assert_eq!(count, 2);
        assert_eq!(rx1.recv().await.unwrap(), StoreEvent::ThreadsChanged(DocId::from("d1")));
        assert_eq!(rx2.recv().await.unwrap(), StoreEvent::ThreadsChanged(DocId::from("d1")));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_counts_drop() {
        let group: FeedGroup<u32> = FeedGroup::new(4);
        assert_eq!(group.publish(7), 0);
        let stats = group.stats();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_hub_get_or_create_is_shared() {
        let hub: FeedHub<Topic, StoreEvent> = FeedHub::new(16);
        let a = hub.get_or_create(&threads("d1")).await;
        let b = hub.get_or_create(&threads("d1")).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(hub.topic_count().await, 1);
    }

    #[tokio::test]
    async fn test_hub_isolates_topics() {
        let hub: FeedHub<Topic, u32> = FeedHub::new(16);
        let mut rx1 = hub.subscribe(&threads("d1")).await;
        let _rx2 = hub.subscribe(&threads("d2")).await;

        assert_eq!(hub.publish(&threads("d2"), 5).await, 1);
        assert_eq!(hub.publish(&threads("unknown"), 5).await, 0);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hub_cleanup() {
        let hub: FeedHub<Topic, u32> = FeedHub::new(16);
        let rx = hub.subscribe(&threads("d1")).await;
        assert!(!hub.remove_if_unused(&threads("d1")).await);
        drop(rx);
        assert!(hub.remove_if_unused(&threads("d1")).await);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(Topic::Pages(DocumentId::from("x")).to_string(), "pages:x");
        assert_eq!(Topic::Presence(DocId::from("y")).to_string(), "presence:y");
        assert_eq!(StoreEvent::ThreadsChanged(DocId::from("z")).topic(), threads("z"));
    }
}

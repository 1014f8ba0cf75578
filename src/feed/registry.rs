//! Subscriber Registry
//!
//! Tracks which delivery loops are attached and must receive updates.
//! Membership changes take the write lock; the scheduler copies the handles
//! out under a short read lock and dispatches without holding it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::core::coord::Coordinate;

/// Inbox capacity. One slot: a subscriber holds at most one undelivered position.
pub const INBOX_CAPACITY: usize = 1;

/// Registry-assigned subscriber identity. Ids increase with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw id value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry-side view of a subscriber: identity, filter and the inbox sender.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    /// Subscriber identity.
    pub id: SubscriberId,
    /// Client-supplied filter value. Stored, not yet used for targeting.
    pub filter: f64,
    /// Sending half of the subscriber's inbox.
    pub inbox: mpsc::Sender<Coordinate>,
    /// Set while the subscriber is missing dispatches. Shared by every clone.
    lagging: Arc<AtomicBool>,
}

impl SubscriberHandle {
    /// Whether the last dispatch to this subscriber was dropped.
    pub fn is_lagging(&self) -> bool {
        self.lagging.load(Ordering::Relaxed)
    }

    /// Record a dropped dispatch. Returns true if this starts a new lagging run.
    pub fn mark_lagging(&self) -> bool {
        !self.lagging.swap(true, Ordering::Relaxed)
    }

    /// Record a delivered dispatch. Returns true if this ends a lagging run.
    pub fn mark_caught_up(&self) -> bool {
        self.lagging.swap(false, Ordering::Relaxed)
    }
}

/// Thread-safe set of live subscribers.
pub struct SubscriberRegistry {
    /// Live subscribers, ordered by registration.
    subscribers: RwLock<BTreeMap<SubscriberId, SubscriberHandle>>,
    /// Next id to hand out.
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber with `filter`.
    /// Returns its handle and the receiving half of its inbox.
    pub async fn register(&self, filter: f64) -> (SubscriberHandle, mpsc::Receiver<Coordinate>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let handle = SubscriberHandle {
            id: SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            filter,
            inbox: tx,
            lagging: Arc::new(AtomicBool::new(false)),
        };
        self.add(handle.clone()).await;
        (handle, rx)
    }

    /// Add a handle. A handle whose id is already present replaces it,
    /// so a subscriber never appears twice.
    pub async fn add(&self, handle: SubscriberHandle) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(handle.id, handle);
    }

    /// Remove a subscriber. Returns true only for the call that actually
    /// removed it; removing an absent id is a no-op.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, remaining = subscribers.len(), "subscriber unregistered");
        }
        removed
    }

    /// Copy of the current membership, in registration order.
    pub async fn snapshot(&self) -> Vec<SubscriberHandle> {
        let subscribers = self.subscribers.read().await;
        subscribers.values().cloned().collect()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }

    /// Number of live subscribers.
    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Whether there are no live subscribers.
    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    /// Drop every handle. Delivery loops see their inbox close and exit.
    pub async fn clear(&self) {
        self.subscribers.write().await.clear();
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = SubscriberRegistry::new();
        let (handle, _rx) = registry.register(0.0).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(handle.id).await);

        assert!(registry.remove(handle.id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (_keep, _keep_rx) = registry.register(1.0).await;
        let before = registry.len().await;

        let (handle, _rx) = registry.register(2.0).await;
        assert!(registry.remove(handle.id).await);
        assert!(!registry.remove(handle.id).await);

        assert_eq!(registry.len().await, before);
    }

    #[tokio::test]
    async fn test_add_same_handle_twice() {
        let registry = SubscriberRegistry::new();
        let (handle, _rx) = registry.register(0.0).await;

        registry.add(handle.clone()).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let mut ids = Vec::new();
        let mut inboxes = Vec::new();
        for i in 0..5 {
            let (handle, rx) = registry.register(i as f64).await;
            ids.push(handle.id);
            inboxes.push(rx);
        }

        let snapshot: Vec<_> = registry.snapshot().await.iter().map(|h| h.id).collect();
        assert_eq!(snapshot, ids);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = registry.register(0.0).await;
        let snapshot = registry.snapshot().await;

        registry.remove(a.id).await;
        let (_b, _rx_b) = registry.register(0.0).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, a.id);
    }

    #[tokio::test]
    async fn test_concurrent_remove_single_winner() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (handle, _rx) = registry.register(0.0).await;
        let id = handle.id;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.remove(id).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_lagging_state_shared_across_snapshots() {
        let registry = SubscriberRegistry::new();
        let (handle, _rx) = registry.register(0.0).await;
        assert!(!handle.is_lagging());

        let seen = registry.snapshot().await;
        assert!(seen[0].mark_lagging());
        assert!(!seen[0].mark_lagging());
        assert!(handle.is_lagging());
        assert!(registry.snapshot().await[0].is_lagging());

        assert!(handle.mark_caught_up());
        assert!(!handle.mark_caught_up());
        assert!(!seen[0].is_lagging());
    }

    #[tokio::test]
    async fn test_clear_closes_inboxes() {
        let registry = SubscriberRegistry::new();
        let (handle, mut rx) = registry.register(0.0).await;
        drop(handle);

        registry.clear().await;
        assert!(rx.recv().await.is_none());
    }
}

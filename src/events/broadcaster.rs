//! In-process publish/subscribe hub for change records
//!
//! ```text
//! Reconciler ──publish──► Broadcaster ──try_send──► subscriber mpsc (bounded)
//!                                      └─────────► subscriber mpsc (bounded)
//! ```
//!
//! Every subscriber owns a bounded channel. A full channel skips the event
//! for that subscriber only; a closed channel is pruned.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::EventSink;
use crate::reconcile::ChangeRecord;

/// Configuration for the broadcaster
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Per-subscriber buffer (default: 64)
    pub buffer_size: usize,
    /// Wait this long for room in a full buffer before dropping (default: none)
    pub delivery_timeout: Option<Duration>,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            delivery_timeout: None,
        }
    }
}

/// Unique subscription id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receiving end of a subscription
///
/// Dropping it closes the channel; the broadcaster prunes it on the next
/// broadcast.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<ChangeRecord>>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next record; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Arc<ChangeRecord>> {
        self.receiver.recv().await
    }

    /// Next record if one is queued
    pub fn try_recv(&mut self) -> Option<Arc<ChangeRecord>> {
        self.receiver.try_recv().ok()
    }

    /// Events skipped because this subscriber's buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Subscriber {
    sender: mpsc::Sender<Arc<ChangeRecord>>,
    dropped: Arc<AtomicU64>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Counters for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Fan-out hub for change records
pub struct Broadcaster {
    config: BroadcasterConfig,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    subscriber_count: AtomicUsize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        info!(
            buffer_size = config.buffer_size,
            delivery_timeout_ms = config.delivery_timeout.map(|d| d.as_millis() as u64),
            "Broadcaster initialized"
        );
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicUsize::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.buffer_size.max(1));
        let id = SubscriptionId::new();
        let dropped = Arc::new(AtomicU64::new(0));

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id,
            Subscriber {
                sender,
                dropped: Arc::clone(&dropped),
            },
        );
        self.subscriber_count
            .store(subscribers.len(), Ordering::Relaxed);
        debug!(subscription = %id, total = subscribers.len(), "Subscriber added");

        Subscription {
            id,
            receiver,
            dropped,
        }
    }

    /// Remove a subscriber and close its channel
    ///
    /// Records already queued stay readable. Returns false if it was
    /// already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        self.subscriber_count
            .store(subscribers.len(), Ordering::Relaxed);
        if removed {
            debug!(subscription = %id, total = subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Deliver a record to every current subscriber
    ///
    /// Never waits on a full buffer beyond the configured delivery timeout.
    pub async fn broadcast(&self, record: ChangeRecord) -> BroadcastReport {
        let record = Arc::new(record);
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                let result = match self.config.delivery_timeout {
                    None => subscriber
                        .sender
                        .try_send(Arc::clone(&record))
                        .map_err(|e| matches!(e, mpsc::error::TrySendError::Closed(_))),
                    Some(timeout) => subscriber
                        .sender
                        .send_timeout(Arc::clone(&record), timeout)
                        .await
                        .map_err(|e| matches!(e, mpsc::error::SendTimeoutError::Closed(_))),
                };

                match result {
                    Ok(()) => report.delivered += 1,
                    Err(true) => {
                        report.closed += 1;
                        closed.push(*id);
                    }
                    Err(false) => {
                        report.dropped += 1;
                        subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);

        if report.dropped > 0 {
            debug!(event = %record.event, dropped = report.dropped, "Subscribers overrun");
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &closed {
                subscribers.remove(id);
            }
            self.subscriber_count
                .store(subscribers.len(), Ordering::Relaxed);
            debug!(pruned = closed.len(), total = subscribers.len(), "Closed subscribers pruned");
        }

        report
    }

    /// Registered subscribers, including closed ones not yet pruned
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            subscribers: self.subscriber_count(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

#[async_trait]
impl EventSink for Broadcaster {
    async fn publish(&self, record: ChangeRecord) {
        self.broadcast(record).await;
    }

    async fn has_subscribers(&self) -> bool {
        if self.subscriber_count() == 0 {
            return false;
        }
        self.subscribers
            .read()
            .await
            .values()
            .any(|s| !s.sender.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ChangeKind;
    use serde_json::json;
    use std::time::Instant;

    fn record(n: usize) -> ChangeRecord {
        ChangeRecord::new(
            ChangeKind::New,
            "ChatMessage",
            format!("m{}", n),
            json!({ "n": n }),
            "sp-1",
        )
    }

    #[tokio::test]
    async fn test_per_subscriber_order() {
        let hub = Broadcaster::default();
        let mut sub = hub.subscribe().await;

        for n in 0..10 {
            hub.broadcast(record(n)).await;
        }
        for n in 0..10 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got.object_id, format!("m{}", n));
        }
    }

    #[tokio::test]
    async fn test_full_subscriber_is_skipped() {
        let hub = Broadcaster::new(BroadcasterConfig {
            buffer_size: 2,
            delivery_timeout: None,
        });
        let mut sub = hub.subscribe().await;

        let mut delivered = 0;
        for n in 0..5 {
            delivered += hub.broadcast(record(n)).await.delivered;
        }
        assert_eq!(delivered, 2);
        assert_eq!(sub.dropped(), 3);
        assert_eq!(hub.stats().dropped, 3);

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let hub = Broadcaster::default();
        let mut sub = hub.subscribe().await;
        hub.broadcast(record(1)).await;

        assert!(hub.unsubscribe(sub.id()).await);
        assert!(!hub.unsubscribe(sub.id()).await);
        assert_eq!(hub.subscriber_count(), 0);

        // Queued record still readable, then closed
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let hub = Broadcaster::default();
        let sub = hub.subscribe().await;
        assert!(hub.has_subscribers().await);

        drop(sub);
        assert!(!hub.has_subscribers().await);

        let report = hub.broadcast(record(1)).await;
        assert_eq!(report.closed, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_isolation() {
        let hub = Arc::new(Broadcaster::new(BroadcasterConfig {
            buffer_size: 16,
            delivery_timeout: None,
        }));
        let stalled = hub.subscribe().await;
        let mut draining = hub.subscribe().await;

        let drain = tokio::spawn(async move {
            let mut received = 0;
            while received < 100 {
                if draining.recv().await.is_none() {
                    break;
                }
                received += 1;
            }
            received
        });

        for n in 0..100 {
            let started = Instant::now();
            let report = hub.broadcast(record(n)).await;
            assert!(started.elapsed() < Duration::from_millis(100));
            assert!(report.delivered >= 1);
            tokio::task::yield_now().await;
        }

        assert_eq!(drain.await.unwrap(), 100);
        assert_eq!(stalled.dropped(), 84);
    }

    #[tokio::test]
    async fn test_delivery_timeout_bounds_broadcast() {
        let hub = Broadcaster::new(BroadcasterConfig {
            buffer_size: 1,
            delivery_timeout: Some(Duration::from_millis(20)),
        });
        let stalled = hub.subscribe().await;

        hub.broadcast(record(0)).await;
        let started = Instant::now();
        let report = hub.broadcast(record(1)).await;

        assert_eq!(report.dropped, 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(stalled.dropped(), 1);
    }
}

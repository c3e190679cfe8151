// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process topic-based update bus.
//!
//! Topics are `ride:<id>` and `location:<driverId>`. Publishing is
//! fire-and-forget; each subscriber owns an unbounded channel, so a slow
//! consumer never blocks delivery to the others. Messages on one topic are
//! delivered in publish order because publishing happens under the topic
//! map lock. Delivery is at-most-once: nothing survives a restart.
//!
//! Every subscription unsubscribes itself on drop. The embedding transport
//! must drop the subscription on client disconnect or the topic keeps the
//! dead channel until the next publish prunes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

/// A message delivered to topic subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// The topic this message was published on.
    pub topic: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
}

struct TopicSubscriber {
    id: u64,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Vec<TopicSubscriber>>>,
    next_subscriber_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
}

/// Counters snapshot for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Messages accepted by `publish`.
    pub published: u64,
    /// Subscriber deliveries (one message to three subscribers counts 3).
    pub delivered: u64,
}

/// Topic pub/sub shared by the engine and the location pipeline.
#[derive(Clone, Default)]
pub struct UpdateBus {
    inner: Arc<BusInner>,
}

impl UpdateBus {
    /// Create a bus with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic carrying state changes for one ride.
    pub fn ride_topic(ride_id: &str) -> String {
        format!("ride:{ride_id}")
    }

    /// Topic carrying raw position pings for one driver.
    pub fn location_topic(driver_id: &str) -> String {
        format!("location:{driver_id}")
    }

    /// Publish a payload to every current subscriber of `topic`.
    ///
    /// Fire-and-forget: publishing to a topic with no subscribers is a
    /// successful no-op, and a closed subscriber channel is pruned rather
    /// than reported.
    pub fn publish(&self, topic: &str, payload: Value) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.inner.topics.lock().expect("bus lock poisoned");
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };
        subscribers.retain(|sub| {
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match sub.tx.send(message) {
                Ok(()) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                    true
                }
                // Receiver dropped without unsubscribing; prune it.
                Err(_) => false,
            }
        });
        if subscribers.is_empty() {
            let _ = topics.remove(topic);
        }
    }

    /// Subscribe to a topic. The returned handle yields messages in publish
    /// order and unsubscribes when dropped.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.inner.topics.lock().expect("bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_default()
            .push(TopicSubscriber { id, tx });
        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers across all topics.
    pub fn subscriber_count(&self) -> usize {
        let topics = self.inner.topics.lock().expect("bus lock poisoned");
        topics.values().map(Vec::len).sum()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
        }
    }
}

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusMessage>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut topics = inner.topics.lock().expect("bus lock poisoned");
        if let Some(subscribers) = topics.get_mut(&self.topic) {
            subscribers.retain(|sub| sub.id != self.id);
            if subscribers.is_empty() {
                let _ = topics.remove(&self.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_messages_arrive_in_publish_order() {
        let bus = UpdateBus::new();
        let mut sub = bus.subscribe("ride:r-1");

        for i in 0..100 {
            bus.publish("ride:r-1", json!({ "seq": i }));
        }

        for i in 0..100 {
            let message = sub.recv().await.unwrap();
            assert_eq!(message.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_each_message() {
        let bus = UpdateBus::new();
        let mut first = bus.subscribe("ride:r-1");
        let mut second = bus.subscribe("ride:r-1");

        bus.publish("ride:r-1", json!({"status": "MATCHED"}));

        assert_eq!(first.recv().await.unwrap().payload["status"], "MATCHED");
        assert_eq!(second.recv().await.unwrap().payload["status"], "MATCHED");
        assert_eq!(bus.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = UpdateBus::new();
        bus.publish("ride:ghost", json!({}));
        assert_eq!(bus.stats().published, 1);
        assert_eq!(bus.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = UpdateBus::new();
        let sub = bus.subscribe("location:D1");
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_subscriber_does_not_stop_delivery_to_others() {
        let bus = UpdateBus::new();
        let dead = bus.subscribe("ride:r-1");
        let mut live = bus.subscribe("ride:r-1");

        // Simulate a consumer that went away without cleanup.
        std::mem::forget(dead.rx_closed_for_test());

        bus.publish("ride:r-1", json!({"n": 1}));
        assert_eq!(live.recv().await.unwrap().payload["n"], 1);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = UpdateBus::new();
        let mut ride = bus.subscribe("ride:r-1");
        let mut location = bus.subscribe("location:D1");

        bus.publish("location:D1", json!({"lat": 19.0}));

        assert!(ride.try_recv().is_none());
        assert_eq!(location.recv().await.unwrap().topic, "location:D1");
    }

    impl Subscription {
        /// Close the receiver while keeping the registration, so a publish
        /// sees a dead channel.
        fn rx_closed_for_test(mut self) -> Self {
            self.rx.close();
            self
        }
    }
}

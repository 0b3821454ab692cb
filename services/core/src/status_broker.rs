//! In-process notification fabric.
//!
//! Topic-keyed broadcast channels: every status transition goes to the
//! broadcast topic, and to a per-photo topic when anyone is subscribed to it.
//! Each subscriber gets a bounded buffer; a slow subscriber loses the oldest
//! entries first, so liveness is never held hostage by one client. Missed
//! transitions are recoverable through the polling endpoint.

use crate::model::{PhotoStatus, StatusUpdate};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

/// Topic receiving every status transition on any photo.
pub const BROADCAST_TOPIC: &str = "photo-status/all";

/// Topic name for a single photo's transitions.
pub fn photo_topic(photo_id: Uuid) -> String {
    format!("photo-status/{photo_id}")
}

/// Publish/subscribe broker scoped to this process.
pub struct StatusBroker {
    buffer: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<StatusUpdate>>>,
}

impl StatusBroker {
    /// `buffer` bounds each topic's queue; overflow drops the oldest entry.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic by name, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<StatusUpdate> {
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Publish a status transition to the broadcast topic and, when it has
    /// subscribers, to the photo's own topic.
    pub fn publish(&self, photo_id: Uuid, status: PhotoStatus, message: &str) {
        let update = StatusUpdate {
            photo_id,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
        };

        // Clone the senders out so the registry lock is released before any
        // per-subscriber delivery.
        let (all, individual) = {
            let topics = self.topics.read();
            (
                topics.get(BROADCAST_TOPIC).cloned(),
                topics.get(&photo_topic(photo_id)).cloned(),
            )
        };

        let mut delivered = 0usize;
        if let Some(sender) = all {
            delivered += sender.send(update.clone()).unwrap_or(0);
        }
        if let Some(sender) = individual {
            delivered += sender.send(update).unwrap_or(0);
        }

        metrics::counter!("notify.published").increment(1);
        trace!(
            photo_id = %photo_id,
            status = %status,
            subscribers = delivered,
            "Published status update"
        );
    }

    /// Drop topics nobody listens to any more. Called opportunistically by
    /// the subscription endpoint when a connection closes.
    pub fn prune(&self) {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|name, sender| name == BROADCAST_TOPIC || sender.receiver_count() > 0);
        let removed = before - topics.len();
        if removed > 0 {
            debug!(removed, "Pruned idle topics");
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_topic_receives_every_transition() {
        let broker = StatusBroker::new(16);
        let mut rx = broker.subscribe(BROADCAST_TOPIC);

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        broker.publish(a, PhotoStatus::Queued, "queued");
        broker.publish(b, PhotoStatus::Processing, "processing");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.photo_id, a);
        assert_eq!(first.status, PhotoStatus::Queued);
        assert_eq!(second.photo_id, b);
    }

    #[tokio::test]
    async fn test_per_photo_topic_is_filtered() {
        let broker = StatusBroker::new(16);
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rx = broker.subscribe(&photo_topic(watched));

        broker.publish(other, PhotoStatus::Queued, "queued");
        broker.publish(watched, PhotoStatus::Completed, "done");

        let update = rx.recv().await.unwrap();
        assert_eq!(update.photo_id, watched);
        assert_eq!(update.status, PhotoStatus::Completed);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let broker = StatusBroker::new(2);
        let mut rx = broker.subscribe(BROADCAST_TOPIC);
        let id = Uuid::new_v4();

        for i in 0..5 {
            broker.publish(id, PhotoStatus::Processing, &format!("step {i}"));
        }

        // The first recv reports the lag, subsequent recvs yield the newest
        // buffered entries.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        let update = rx.recv().await.unwrap();
        assert_eq!(update.message, "step 3");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let broker = StatusBroker::new(4);
        broker.publish(Uuid::new_v4(), PhotoStatus::Failed, "no listeners");
    }

    #[tokio::test]
    async fn test_prune_keeps_broadcast_topic() {
        let broker = StatusBroker::new(4);
        let id = Uuid::new_v4();
        {
            let _rx = broker.subscribe(&photo_topic(id));
            assert_eq!(broker.subscriber_count(&photo_topic(id)), 1);
        }
        broker.subscribe(BROADCAST_TOPIC);
        broker.prune();
        assert_eq!(broker.subscriber_count(&photo_topic(id)), 0);
        assert!(broker.topics.read().contains_key(BROADCAST_TOPIC));
    }
}

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{new_message_id, PublishReceipt, TopicNotification};
use crate::{BackendError, Result};

/// In-memory broadcast topic
///
/// Every live subscriber receives its own copy of each publish. Dropped
/// receivers are pruned on the next publish.
pub struct InMemoryTopic {
    name: String,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TopicNotification>>>,
    closed: Mutex<bool>,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TopicNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, subject: &str, message: &str) -> Result<PublishReceipt> {
        if *self.closed.lock() {
            return Err(BackendError::closed(&self.name));
        }

        let notification = TopicNotification {
            message_id: new_message_id(),
            topic: self.name.clone(),
            subject: Some(subject.to_string()).filter(|s| !s.is_empty()),
            message: message.to_string(),
            published_at: Utc::now(),
        };

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
        let delivered_to = subscribers.len();

        debug!(
            topic = %self.name,
            message_id = %notification.message_id,
            delivered_to,
            "notification published"
        );

        Ok(PublishReceipt {
            message_id: notification.message_id,
            delivered_to,
        })
    }

    /// Drop all subscriptions; pending receivers drain then end
    pub fn close(&self) {
        *self.closed.lock() = true;
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_fans_out_to_every_subscriber() {
        let topic = InMemoryTopic::new("sns-poc");
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();

        let receipt = topic.publish("id-42", "id-42").unwrap();
        assert_eq!(receipt.delivered_to, 2);

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.message, "id-42");
        assert_eq!(got_a.subject.as_deref(), Some("id-42"));
        assert_eq!(got_a.message_id, got_b.message_id);
    }

    #[test]
    fn test_publish_without_subscribers_is_accepted() {
        let topic = InMemoryTopic::new("sns-poc");
        let receipt = topic.publish("s", "m").unwrap();
        assert_eq!(receipt.delivered_to, 0);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let topic = InMemoryTopic::new("sns-poc");
        let keep = topic.subscribe();
        drop(topic.subscribe());

        let receipt = topic.publish("s", "m").unwrap();
        assert_eq!(receipt.delivered_to, 1);
        assert_eq!(topic.subscriber_count(), 1);
        drop(keep);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let topic = InMemoryTopic::new("sns-poc");
        let mut rx = topic.subscribe();
        topic.close();

        assert!(rx.recv().await.is_none());
        assert!(topic.publish("s", "m").is_err());
    }
}

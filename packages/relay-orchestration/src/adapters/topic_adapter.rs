use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_backends::{BackendKind, TopicClient};
use tracing::{error, info};

use super::{bounded_call, DispatchResult, ForwardAdapter};
use crate::correlation::{CorrelationContext, Event};

/// Publishes to a broadcast topic with subject = message = tracking id
pub struct TopicAdapter {
    client: Arc<dyn TopicClient>,
    topic: String,
    timeout: Duration,
}

impl TopicAdapter {
    pub fn new(client: Arc<dyn TopicClient>, topic: String, timeout: Duration) -> Self {
        Self {
            client,
            topic,
            timeout,
        }
    }
}

#[async_trait]
impl ForwardAdapter for TopicAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Topic
    }

    async fn forward(&self, _event: &Event, ctx: &CorrelationContext) -> DispatchResult {
        info!(topic = %self.topic, tracking_id = %ctx.tracking_id, "About to post to topic");

        let id = ctx.tracking_id.as_str();
        let call = self.client.publish(&self.topic, id, id);
        match bounded_call(BackendKind::Topic, self.timeout, call).await {
            Ok(receipt) => {
                info!(
                    topic = %self.topic,
                    message_id = %receipt.message_id,
                    delivered_to = receipt.delivered_to,
                    "response from topic"
                );
                DispatchResult::Accepted {
                    backend: BackendKind::Topic,
                    message_id: Some(receipt.message_id),
                }
            }
            Err(e) => {
                error!(
                    topic = %self.topic,
                    tracking_id = %ctx.tracking_id,
                    kind = %e.kind,
                    "topic publish failed: {}",
                    e
                );
                DispatchResult::Failed {
                    backend: BackendKind::Topic,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{Call, RecordingBackend};
    use serde_json::json;

    #[tokio::test]
    async fn test_subject_and_message_are_tracking_id() {
        let backend = RecordingBackend::new();
        let adapter = TopicAdapter::new(backend.clone(), "sns-poc".to_string(), Duration::from_secs(10));

        let event = json!({"tracking_id": "id-42", "payload": [1, 2]})
            .as_object()
            .cloned()
            .unwrap();
        let before = event.clone();
        let ctx = CorrelationContext {
            tracking_id: "id-42".to_string(),
            trace_header: Some("Root=1-abc".to_string()),
            generated: false,
        };

        let result = adapter.forward(&event, &ctx).await;

        assert!(result.is_accepted());
        assert_eq!(event, before);
        assert_eq!(
            backend.calls(),
            vec![Call::Publish {
                topic: "sns-poc".to_string(),
                subject: "id-42".to_string(),
                message: "id-42".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_failure_reported() {
        let backend = RecordingBackend::failing("NotFound: topic");
        let adapter = TopicAdapter::new(backend, "missing".to_string(), Duration::from_secs(10));
        let ctx = CorrelationContext {
            tracking_id: "id-1".to_string(),
            trace_header: None,
            generated: true,
        };

        let result = adapter.forward(&Event::new(), &ctx).await;
        assert!(!result.is_accepted());
        assert_eq!(result.backend(), BackendKind::Topic);
    }
}

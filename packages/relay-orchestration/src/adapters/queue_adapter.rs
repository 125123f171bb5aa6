use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_backends::{BackendKind, QueueClient};
use tracing::{error, info};

use super::{bounded_call, DispatchResult, ForwardAdapter};
use crate::correlation::{CorrelationContext, Event};

/// Sends one message per hop to a work queue; body = tracking id
pub struct QueueAdapter {
    client: Arc<dyn QueueClient>,
    queue: String,
    timeout: Duration,
}

impl QueueAdapter {
    pub fn new(client: Arc<dyn QueueClient>, queue: String, timeout: Duration) -> Self {
        Self {
            client,
            queue,
            timeout,
        }
    }
}

#[async_trait]
impl ForwardAdapter for QueueAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Queue
    }

    async fn forward(&self, _event: &Event, ctx: &CorrelationContext) -> DispatchResult {
        info!(queue = %self.queue, tracking_id = %ctx.tracking_id, "About to send to queue");

        let call = self.client.send_message(&self.queue, &ctx.tracking_id);
        match bounded_call(BackendKind::Queue, self.timeout, call).await {
            Ok(receipt) => {
                info!(
                    queue = %self.queue,
                    message_id = %receipt.message_id,
                    accepted_at = %receipt.accepted_at,
                    "response from queue"
                );
                DispatchResult::Accepted {
                    backend: BackendKind::Queue,
                    message_id: Some(receipt.message_id),
                }
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    tracking_id = %ctx.tracking_id,
                    kind = %e.kind,
                    "queue send failed: {}",
                    e
                );
                DispatchResult::Failed {
                    backend: BackendKind::Queue,
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

    fn ctx(id: &str) -> CorrelationContext {
        CorrelationContext {
            tracking_id: id.to_string(),
            trace_header: None,
            generated: false,
        }
    }

    #[tokio::test]
    async fn test_sends_tracking_id_as_body() {
        let backend = RecordingBackend::new();
        let adapter = QueueAdapter::new(backend.clone(), "sqs-poc".to_string(), Duration::from_secs(10));

        let result = adapter.forward(&Event::new(), &ctx("id-42")).await;

        assert_eq!(result.message_id(), Some("msg-queue-1"));
        assert_eq!(
            backend.calls(),
            vec![Call::Send {
                queue: "sqs-poc".to_string(),
                body: "id-42".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_backend_error_becomes_failed_result() {
        let backend = RecordingBackend::failing("AccessDenied");
        let adapter = QueueAdapter::new(backend.clone(), "sqs-poc".to_string(), Duration::from_secs(10));

        let result = adapter.forward(&Event::new(), &ctx("id-1")).await;

        match result {
            DispatchResult::Failed { backend: kind, reason } => {
                assert_eq!(kind, BackendKind::Queue);
                assert!(reason.contains("AccessDenied"));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        // no internal retry
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        let backend = RecordingBackend::new();
        *backend.stall.lock() = Some(Duration::from_secs(60));
        let adapter = QueueAdapter::new(backend, "sqs-poc".to_string(), Duration::from_secs(10));

        let result = adapter.forward(&Event::new(), &ctx("id-1")).await;

        match result {
            DispatchResult::Failed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }
}

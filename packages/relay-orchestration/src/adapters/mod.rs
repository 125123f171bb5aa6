//! Backend adapters
//!
//! One adapter per messaging primitive, each exposing a single `forward`
//! operation. Adapters never retry: a failed or timed-out backend call is
//! logged with the backend response and reported as `DispatchResult::Failed`.

pub mod bus_adapter;
pub mod queue_adapter;
pub mod topic_adapter;

pub use bus_adapter::{BusAdapter, BUS_DETAIL_TYPE, BUS_SOURCE};
pub use queue_adapter::QueueAdapter;
pub use topic_adapter::TopicAdapter;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use relay_backends::{BackendError, BackendKind, BackendProvider};

use crate::config::RelayConfig;
use crate::correlation::{CorrelationContext, Event};
use crate::error::{RelayError, Result};

/// Outcome of one forward call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Accepted {
        backend: BackendKind,
        message_id: Option<String>,
    },
    Failed {
        backend: BackendKind,
        reason: String,
    },
}

impl DispatchResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchResult::Accepted { .. })
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            DispatchResult::Accepted { backend, .. } | DispatchResult::Failed { backend, .. } => {
                *backend
            }
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            DispatchResult::Accepted { message_id, .. } => message_id.as_deref(),
            DispatchResult::Failed { .. } => None,
        }
    }
}

/// Forwarding capability over one backend
#[async_trait]
pub trait ForwardAdapter: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Forward `event` once; `event` is read-only here
    async fn forward(&self, event: &Event, ctx: &CorrelationContext) -> DispatchResult;
}

/// Construct the adapter for `kind`, building its client through `provider`
///
/// # Errors
///
/// `RelayError::AdapterUnavailable` when the provider cannot build a client.
pub fn build_adapter(
    kind: BackendKind,
    config: &RelayConfig,
    provider: &dyn BackendProvider,
) -> Result<Box<dyn ForwardAdapter>> {
    let unavailable = |source: BackendError| RelayError::AdapterUnavailable {
        backend: kind,
        source,
    };
    let timeout = config.backend_timeout();

    let adapter: Box<dyn ForwardAdapter> = match kind {
        BackendKind::Queue => Box::new(QueueAdapter::new(
            provider.queue_client().map_err(unavailable)?,
            config.queue_identifier.clone(),
            timeout,
        )),
        BackendKind::Topic => Box::new(TopicAdapter::new(
            provider.topic_client().map_err(unavailable)?,
            config.topic_identifier.clone(),
            timeout,
        )),
        BackendKind::Bus => Box::new(BusAdapter::new(
            provider.bus_client().map_err(unavailable)?,
            timeout,
        )),
    };
    Ok(adapter)
}

/// Run a backend call under the per-call bound
pub(crate) async fn bounded_call<T, Fut>(
    backend: BackendKind,
    timeout: Duration,
    call: Fut,
) -> relay_backends::Result<T>
where
    Fut: Future<Output = relay_backends::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::timeout(format!(
            "{} call timed out after {}ms",
            backend,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend clients for adapter and handler tests

    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use relay_backends::{
        BusClient, BusEntry, PublishReceipt, PutEventsOutput, PutEventsResultEntry, QueueClient,
        SendReceipt, TopicClient,
    };

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Send { queue: String, body: String },
        Publish { topic: String, subject: String, message: String },
        PutEvents { entries: Vec<BusEntry> },
    }

    /// Records every call; fails or stalls on demand
    #[derive(Default)]
    pub struct RecordingBackend {
        pub calls: Mutex<Vec<Call>>,
        pub fail_with: Mutex<Option<String>>,
        pub reject_entries: Mutex<bool>,
        pub stall: Mutex<Option<Duration>>,
        pub unavailable: Mutex<Vec<BackendKind>>,
    }

    impl RecordingBackend {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing(reason: &str) -> Arc<Self> {
            let backend = Self::default();
            *backend.fail_with.lock() = Some(reason.to_string());
            Arc::new(backend)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        async fn behave(&self, call: Call) -> relay_backends::Result<()> {
            self.calls.lock().push(call);
            let stall = *self.stall.lock();
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            match self.fail_with.lock().clone() {
                Some(reason) => Err(BackendError::rejected(reason)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl QueueClient for RecordingBackend {
        async fn send_message(&self, queue: &str, body: &str) -> relay_backends::Result<SendReceipt> {
            self.behave(Call::Send {
                queue: queue.to_string(),
                body: body.to_string(),
            })
            .await?;
            Ok(SendReceipt {
                message_id: "msg-queue-1".to_string(),
                accepted_at: Utc::now(),
            })
        }
    }

    #[async_trait]
    impl TopicClient for RecordingBackend {
        async fn publish(
            &self,
            topic: &str,
            subject: &str,
            message: &str,
        ) -> relay_backends::Result<PublishReceipt> {
            self.behave(Call::Publish {
                topic: topic.to_string(),
                subject: subject.to_string(),
                message: message.to_string(),
            })
            .await?;
            Ok(PublishReceipt {
                message_id: "msg-topic-1".to_string(),
                delivered_to: 1,
            })
        }
    }

    #[async_trait]
    impl BusClient for RecordingBackend {
        async fn put_events(
            &self,
            entries: Vec<BusEntry>,
        ) -> relay_backends::Result<PutEventsOutput> {
            let count = entries.len();
            self.behave(Call::PutEvents { entries }).await?;
            let reject = *self.reject_entries.lock();
            let results = (0..count)
                .map(|i| {
                    if reject {
                        PutEventsResultEntry::failed("InternalFailure", "entry dropped")
                    } else {
                        PutEventsResultEntry::accepted(format!("evt-{}", i + 1))
                    }
                })
                .collect();
            Ok(PutEventsOutput::from_entries(results))
        }
    }

    /// Provider handing out the same recording backend for every primitive
    pub struct RecordingProvider(pub Arc<RecordingBackend>);

    impl BackendProvider for RecordingProvider {
        fn queue_client(&self) -> relay_backends::Result<Arc<dyn QueueClient>> {
            self.check(BackendKind::Queue)?;
            Ok(self.0.clone())
        }

        fn topic_client(&self) -> relay_backends::Result<Arc<dyn TopicClient>> {
            self.check(BackendKind::Topic)?;
            Ok(self.0.clone())
        }

        fn bus_client(&self) -> relay_backends::Result<Arc<dyn BusClient>> {
            self.check(BackendKind::Bus)?;
            Ok(self.0.clone())
        }
    }

    impl RecordingProvider {
        fn check(&self, kind: BackendKind) -> relay_backends::Result<()> {
            if self.0.unavailable.lock().contains(&kind) {
                return Err(BackendError::unavailable(format!("{} disabled", kind)));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_build_adapter_per_kind() {
        let provider = RecordingProvider(RecordingBackend::new());
        let config = RelayConfig::default();

        for kind in [BackendKind::Queue, BackendKind::Topic, BackendKind::Bus] {
            let adapter = build_adapter(kind, &config, &provider).unwrap();
            assert_eq!(adapter.backend(), kind);
        }
    }

    #[test]
    fn test_build_adapter_unavailable() {
        let backend = RecordingBackend::new();
        backend.unavailable.lock().push(BackendKind::Topic);
        let provider = RecordingProvider(backend);

        let err = build_adapter(BackendKind::Topic, &RelayConfig::default(), &provider)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RelayError::AdapterUnavailable {
                backend: BackendKind::Topic,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_call_times_out() {
        let result: relay_backends::Result<()> = bounded_call(
            BackendKind::Queue,
            Duration::from_millis(50),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, relay_backends::ErrorKind::Timeout);
    }

    #[test]
    fn test_dispatch_result_accessors() {
        let ok = DispatchResult::Accepted {
            backend: BackendKind::Queue,
            message_id: Some("m-1".to_string()),
        };
        assert!(ok.is_accepted());
        assert_eq!(ok.message_id(), Some("m-1"));

        let failed = DispatchResult::Failed {
            backend: BackendKind::Bus,
            reason: "x".to_string(),
        };
        assert!(!failed.is_accepted());
        assert_eq!(failed.backend(), BackendKind::Bus);
        assert_eq!(failed.message_id(), None);
    }
}

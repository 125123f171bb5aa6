use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_backends::{BackendKind, BusClient, BusEntry};
use serde_json::json;
use tracing::{error, info};

use super::{bounded_call, DispatchResult, ForwardAdapter};
use crate::correlation::{CorrelationContext, Event};

/// Fixed `source` of every entry this relay emits
pub const BUS_SOURCE: &str = "publish_to_bridge";

/// Fixed `detail_type` of every entry this relay emits
pub const BUS_DETAIL_TYPE: &str = "publish_to_bridge";

/// Emits one structured entry to the event bus
///
/// `source` and `detail_type` are constant so downstream rules can match on
/// them. The trace header observed at this hop is attached as an opaque
/// field.
pub struct BusAdapter {
    client: Arc<dyn BusClient>,
    timeout: Duration,
}

impl BusAdapter {
    pub fn new(client: Arc<dyn BusClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn entry_for(ctx: &CorrelationContext) -> BusEntry {
        BusEntry::new(
            BUS_SOURCE,
            BUS_DETAIL_TYPE,
            json!({
                "calling_function": BUS_SOURCE,
                "tracking_id": ctx.tracking_id,
            }),
        )
        .with_trace_header(ctx.trace_header.clone())
    }
}

#[async_trait]
impl ForwardAdapter for BusAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Bus
    }

    async fn forward(&self, _event: &Event, ctx: &CorrelationContext) -> DispatchResult {
        info!(
            tracking_id = %ctx.tracking_id,
            trace_header = ?ctx.trace_header,
            "About to send to event bus"
        );

        let call = self.client.put_events(vec![Self::entry_for(ctx)]);
        let output = match bounded_call(BackendKind::Bus, self.timeout, call).await {
            Ok(output) => output,
            Err(e) => {
                error!(
                    tracking_id = %ctx.tracking_id,
                    kind = %e.kind,
                    "event bus call failed: {}",
                    e
                );
                return DispatchResult::Failed {
                    backend: BackendKind::Bus,
                    reason: e.to_string(),
                };
            }
        };

        info!(
            failed_entry_count = output.failed_entry_count,
            "response from event bus: {:?}",
            output.entries
        );

        if output.failed_entry_count > 0 {
            let reason = output
                .entries
                .iter()
                .find(|e| e.is_failure())
                .map(|e| {
                    format!(
                        "{}: {}",
                        e.error_code.as_deref().unwrap_or("Unknown"),
                        e.error_message.as_deref().unwrap_or("")
                    )
                })
                .unwrap_or_else(|| "entry rejected".to_string());
            error!(tracking_id = %ctx.tracking_id, "event bus rejected entry: {}", reason);
            return DispatchResult::Failed {
                backend: BackendKind::Bus,
                reason,
            };
        }

        DispatchResult::Accepted {
            backend: BackendKind::Bus,
            message_id: output.entries.into_iter().find_map(|e| e.event_id),
        }
    }
}

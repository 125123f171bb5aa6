use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_backends::{BackendKind, BackendProvider};
use tracing::{error, info, info_span, Instrument};

use crate::adapters::{build_adapter, DispatchResult};
use crate::config::RelayConfig;
use crate::correlation::{ensure_tracking_id, Event, ExecutionContext};
use crate::error::{RelayError, Result};
use crate::stage::{Action, Stage, StageRouter};

/// Per-invocation hop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopState {
    Start,
    TrackingResolved,
    StageResolved,
    Dispatched,
    DispatchFailed,
    Done,
}

impl HopState {
    pub fn state_name(&self) -> &'static str {
        match self {
            HopState::Start => "start",
            HopState::TrackingResolved => "tracking_resolved",
            HopState::StageResolved => "stage_resolved",
            HopState::Dispatched => "dispatched",
            HopState::DispatchFailed => "dispatch_failed",
            HopState::Done => "done",
        }
    }

    fn can_transition_to(&self, next: HopState) -> bool {
        matches!(
            (self, next),
            (HopState::Start, HopState::TrackingResolved)
                | (HopState::TrackingResolved, HopState::StageResolved)
                | (HopState::StageResolved, HopState::Dispatched)
                | (HopState::StageResolved, HopState::DispatchFailed)
                | (HopState::Dispatched, HopState::Done)
                | (HopState::DispatchFailed, HopState::Done)
        )
    }
}

impl std::fmt::Display for HopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Linear state machine for one hop
pub struct HopStateMachine {
    state: HopState,
    history: Vec<HopState>,
}

impl Default for HopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HopStateMachine {
    pub fn new() -> Self {
        Self {
            state: HopState::Start,
            history: vec![HopState::Start],
        }
    }

    pub fn state(&self) -> HopState {
        self.state
    }

    pub fn history(&self) -> &[HopState] {
        &self.history
    }

    pub fn transition(&mut self, next: HopState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: next.state_name().to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub fn into_history(self) -> Vec<HopState> {
        self.history
    }
}

/// What one invocation did
///
/// Logs stay the authoritative record; the report mirrors them for callers
/// that host the handler in-process.
#[derive(Debug, Clone)]
pub struct HopReport {
    pub tracking_id: String,
    pub tracking_id_generated: bool,
    /// Trace header this invocation ran under
    pub trace_header: Option<String>,
    pub stage: Stage,
    pub action: Action,
    /// `None` for terminal actions
    pub dispatch: Option<DispatchResult>,
    pub states: Vec<HopState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HopReport {
    pub fn final_state(&self) -> HopState {
        self.states.last().copied().unwrap_or(HopState::Start)
    }

    pub fn is_failure(&self) -> bool {
        self.states.contains(&HopState::DispatchFailed)
    }

    pub fn forwarded_to(&self) -> Option<BackendKind> {
        self.dispatch
            .as_ref()
            .filter(|d| d.is_accepted())
            .map(DispatchResult::backend)
    }
}

/// Anything that can serve one hop invocation
#[async_trait]
pub trait HopInvoker: Send + Sync {
    async fn invoke(&self, event: Event, exec: ExecutionContext) -> Result<HopReport>;
}

/// Pipeline handler: one deployed instance per stage
///
/// Stateless across invocations; safe to call concurrently.
pub struct PipelineHandler {
    config: Arc<RelayConfig>,
    provider: Arc<dyn BackendProvider>,
}

impl PipelineHandler {
    pub fn new(config: Arc<RelayConfig>, provider: Arc<dyn BackendProvider>) -> Self {
        Self { config, provider }
    }

    pub fn stage(&self) -> &Stage {
        &self.config.stage
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle one incoming event
    ///
    /// Injects a tracking id into `event` when missing, forwards through at
    /// most one adapter and logs every step.
    ///
    /// # Errors
    ///
    /// - `AdapterUnavailable`: the backend client could not be built
    /// - `DispatchFailed`: only for the bus hop, so the hosting scheduler's
    ///   retry applies; queue and topic failures are logged and reported in
    ///   the `HopReport` instead
    pub async fn handle(&self, event: &mut Event, exec: &ExecutionContext) -> Result<HopReport> {
        let span = info_span!(
            "hop",
            stage = %self.config.stage,
            tracking_id = tracing::field::Empty
        );
        self.run_hop(event, exec).instrument(span).await
    }

    async fn run_hop(&self, event: &mut Event, exec: &ExecutionContext) -> Result<HopReport> {
        let started_at = Utc::now();
        let mut sm = HopStateMachine::new();

        info!(event = %serde_json::Value::Object(event.clone()), "event received");
        info!(trace_header = ?exec.trace_header, "execution context");

        let ctx = ensure_tracking_id(event, exec);
        tracing::Span::current().record("tracking_id", ctx.tracking_id.as_str());
        if ctx.generated {
            info!(tracking_id = %ctx.tracking_id, "assigned new tracking id");
        }
        sm.transition(HopState::TrackingResolved)?;

        let action = StageRouter::route(&self.config.stage);
        sm.transition(HopState::StageResolved)?;

        let dispatch = match action.backend() {
            None => {
                info!(tracking_id = %ctx.tracking_id, "No handler implemented, end of the road");
                sm.transition(HopState::Dispatched)?;
                None
            }
            Some(kind) => {
                let adapter = build_adapter(kind, &self.config, self.provider.as_ref())
                    .map_err(|e| {
                        error!(tracking_id = %ctx.tracking_id, backend = %kind, "{}", e);
                        e
                    })?;

                let result = adapter.forward(event, &ctx).await;
                if result.is_accepted() {
                    sm.transition(HopState::Dispatched)?;
                } else {
                    sm.transition(HopState::DispatchFailed)?;
                }
                Some(result)
            }
        };

        sm.transition(HopState::Done)?;

        let report = HopReport {
            tracking_id: ctx.tracking_id,
            tracking_id_generated: ctx.generated,
            trace_header: ctx.trace_header,
            stage: self.config.stage.clone(),
            action,
            dispatch,
            states: sm.into_history(),
            started_at,
            finished_at: Utc::now(),
        };

        match &report.dispatch {
            Some(DispatchResult::Failed { backend, reason }) => {
                error!(
                    tracking_id = %report.tracking_id,
                    backend = %backend,
                    "hop finished with dispatch failure: {}",
                    reason
                );
                if *backend == BackendKind::Bus {
                    return Err(RelayError::DispatchFailed {
                        backend: *backend,
                        tracking_id: report.tracking_id,
                        reason: reason.clone(),
                    });
                }
            }
            Some(DispatchResult::Accepted { backend, message_id }) => {
                info!(
                    tracking_id = %report.tracking_id,
                    backend = %backend,
                    message_id = ?message_id,
                    "hop finished"
                );
            }
            None => info!(tracking_id = %report.tracking_id, "hop finished without forwarding"),
        }

        Ok(report)
    }
}

#[async_trait]
impl HopInvoker for PipelineHandler {
    async fn invoke(&self, mut event: Event, exec: ExecutionContext) -> Result<HopReport> {
        self.handle(&mut event, &exec).await
    }
}

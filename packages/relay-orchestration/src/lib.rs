/*
 * Event Relay - multi-hop messaging pipeline
 *
 * One stateless handler, deployed once per stage, carries a tracking id
 * through a queue, a topic and an event bus to a terminal stage.
 *
 * Architecture:
 * - Correlation (tracking id + opaque trace header)
 * - Stage Router (stage tag -> forwarding action, total)
 * - Backend Adapters (queue / topic / bus, no internal retry)
 * - Pipeline Handler (per-invocation hop state machine)
 * - Topology + Local Runtime (in-memory wiring of the four hops)
 */

pub mod adapters;
pub mod config;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod logging;
pub mod retry;
pub mod runtime;
pub mod stage;
pub mod topology;
pub mod trigger;

// Re-exports
pub use adapters::{build_adapter, BusAdapter, DispatchResult, ForwardAdapter, QueueAdapter, TopicAdapter};
pub use config::{ConfigError, RelayConfig};
pub use correlation::{ensure_tracking_id, CorrelationContext, Event, ExecutionContext};
pub use error::{RelayError, Result};
pub use handler::{HopInvoker, HopReport, HopState, HopStateMachine, PipelineHandler};
pub use logging::init_logging;
pub use retry::RetryPolicy;
pub use runtime::{HopOutcome, LocalRuntime, RuntimeHandle};
pub use stage::{Action, Stage, StageRouter};
pub use topology::{Channel, Edge, PipelineTopology, Schedule, StageNode};
pub use trigger::ScheduleTrigger;

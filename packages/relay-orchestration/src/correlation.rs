//! Correlation context carried across hops
//!
//! The tracking id is assigned once, at the first hop that sees an event
//! without one, and is never regenerated downstream. The trace header is
//! never generated here; it is read from the execution environment of each
//! hop.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Event payload: open mapping from string keys to arbitrary values
pub type Event = Map<String, Value>;

/// Event key holding the tracking id
pub const TRACKING_ID_KEY: &str = "tracking_id";

/// Key used by older producers; read on input, never written
pub const LEGACY_TRACKING_ID_KEY: &str = "my_tracking_id";

/// Environment variable the hosting runtime uses for the trace token
pub const TRACE_HEADER_ENV: &str = "_X_AMZN_TRACE_ID";

/// Per-invocation values supplied by the hosting environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub trace_header: Option<String>,
}

impl ExecutionContext {
    pub fn new(trace_header: Option<String>) -> Self {
        Self {
            trace_header: trace_header.filter(|t| !t.is_empty()),
        }
    }

    /// Read the trace token from the process environment
    pub fn from_env() -> Self {
        Self::new(std::env::var(TRACE_HEADER_ENV).ok())
    }
}

/// Tracking id plus the trace token observed at this hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub tracking_id: String,
    pub trace_header: Option<String>,
    /// True when this hop assigned the tracking id
    pub generated: bool,
}

/// Ensure `event` carries a tracking id and return the hop's context
///
/// An existing non-empty string under `tracking_id` (or the legacy key) is
/// kept as is. Anything else is replaced by a fresh id. Never fails.
pub fn ensure_tracking_id(event: &mut Event, exec: &ExecutionContext) -> CorrelationContext {
    let (tracking_id, generated) = match existing_tracking_id(event) {
        Some(id) => (id, false),
        None => (generate_tracking_id(), true),
    };

    event.insert(
        TRACKING_ID_KEY.to_string(),
        Value::String(tracking_id.clone()),
    );

    CorrelationContext {
        tracking_id,
        trace_header: exec.trace_header.clone(),
        generated,
    }
}

fn existing_tracking_id(event: &Event) -> Option<String> {
    [TRACKING_ID_KEY, LEGACY_TRACKING_ID_KEY]
        .iter()
        .filter_map(|key| event.get(*key))
        .filter_map(Value::as_str)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

pub fn generate_tracking_id() -> String {
    format!("id-{}", Uuid::new_v4().simple())
}

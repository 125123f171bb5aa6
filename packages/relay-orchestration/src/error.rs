use relay_backends::{BackendError, BackendKind};
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Backend client could not be constructed; aborts the invocation
    #[error("{backend} adapter unavailable: {source}")]
    AdapterUnavailable {
        backend: BackendKind,
        #[source]
        source: BackendError,
    },

    /// Backend refused or failed the forward call
    #[error("Dispatch to {backend} failed for {tracking_id}: {reason}")]
    DispatchFailed {
        backend: BackendKind,
        tracking_id: String,
        reason: String,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl RelayError {
    /// Whether the hosting scheduler should treat this as a failed invocation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::AdapterUnavailable { .. } | RelayError::InvalidStateTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_unavailable_display_names_backend() {
        let err = RelayError::AdapterUnavailable {
            backend: BackendKind::Queue,
            source: BackendError::unavailable("no credentials"),
        };
        let msg = err.to_string();
        assert!(msg.contains("queue adapter unavailable"));
        assert!(msg.contains("no credentials"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_dispatch_failed_is_not_fatal() {
        let err = RelayError::DispatchFailed {
            backend: BackendKind::Bus,
            tracking_id: "id-1".to_string(),
            reason: "throttled".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("id-1"));
    }

    #[test]
    fn test_config_error_propagates() {
        fn load() -> Result<crate::config::RelayConfig> {
            Ok(crate::config::RelayConfig::from_yaml_str("backend_timeout_secs: 0\n")?)
        }

        let err = load().unwrap_err();
        assert!(matches!(err, RelayError::Config(ConfigError::Range { .. })));
        assert!(!err.is_fatal());
    }
}

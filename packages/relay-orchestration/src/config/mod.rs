//! Handler configuration
//!
//! One `RelayConfig` is built when a handler instance starts and shared by
//! reference with every invocation. Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. YAML file (`deny_unknown_fields`)
//! 3. Environment overrides
//!
//! # Examples
//!
//! ```rust,ignore
//! use relay_orchestration::config::RelayConfig;
//!
//! let config = RelayConfig::load(Some("relay.yaml".as_ref()))?;
//! let handler = PipelineHandler::new(Arc::new(config), provider);
//! ```
//!
//! ```yaml
//! stage: topic
//! queue_identifier: sqs-poc-mb-719
//! topic_identifier: sns-poc-mb-719
//! log_level: debug
//! backend_timeout_secs: 10
//! rule_retry_attempts: 3
//! ```

pub mod error;

pub use error::{ConfigError, ConfigResult};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::stage::Stage;

pub const ENV_STAGE: &str = "EVENT_TARGET";
pub const ENV_QUEUE: &str = "SQS_QUEUE";
pub const ENV_TOPIC: &str = "SNS_TOPIC";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_BACKEND_TIMEOUT: &str = "BACKEND_TIMEOUT_SECS";
pub const ENV_RULE_RETRY_ATTEMPTS: &str = "RULE_RETRY_ATTEMPTS";
pub const ENV_RULE_RETRY_BACKOFF: &str = "RULE_RETRY_BACKOFF_MS";

/// Placeholder destination for identifiers that were never configured
pub const UNAVAILABLE: &str = "Unavailable";

const TIMEOUT_RANGE: (u64, u64) = (1, 900);
const RETRY_RANGE: (u32, u32) = (0, 185);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Forwarding target of this handler instance
    pub stage: Stage,
    /// Destination for the queue adapter
    pub queue_identifier: String,
    /// Destination for the topic adapter
    pub topic_identifier: String,
    pub log_level: String,
    /// Per backend call bound (1..=900)
    pub backend_timeout_secs: u64,
    /// Re-invocations of a bus rule target after a failure (0..=185)
    pub rule_retry_attempts: u32,
    pub rule_retry_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stage: Stage::default(),
            queue_identifier: UNAVAILABLE.to_string(),
            topic_identifier: UNAVAILABLE.to_string(),
            log_level: "info".to_string(),
            backend_timeout_secs: 10,
            rule_retry_attempts: 3,
            rule_retry_backoff_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Defaults, then optional file, then process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let base = match path {
            Some(p) => Self::from_yaml(p)?,
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    pub fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(stage) = lookup(ENV_STAGE) {
            self.stage = Stage::parse(&stage);
        }
        if let Some(queue) = lookup(ENV_QUEUE) {
            self.queue_identifier = queue;
        }
        if let Some(topic) = lookup(ENV_TOPIC) {
            self.topic_identifier = topic;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level.to_ascii_lowercase();
        }
        if let Some(raw) = lookup(ENV_BACKEND_TIMEOUT) {
            self.backend_timeout_secs = parse_number(ENV_BACKEND_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RULE_RETRY_ATTEMPTS) {
            self.rule_retry_attempts = parse_number(ENV_RULE_RETRY_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RULE_RETRY_BACKOFF) {
            self.rule_retry_backoff_ms = parse_number(ENV_RULE_RETRY_BACKOFF, &raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let (min, max) = TIMEOUT_RANGE;
        if !(min..=max).contains(&self.backend_timeout_secs) {
            return Err(ConfigError::range_with_hint(
                "backend_timeout_secs",
                self.backend_timeout_secs,
                min,
                max,
                "Every backend call needs a finite bound.",
            ));
        }

        let (min, max) = RETRY_RANGE;
        if !(min..=max).contains(&self.rule_retry_attempts) {
            return Err(ConfigError::range_with_hint(
                "rule_retry_attempts",
                self.rule_retry_attempts,
                min,
                max,
                "Use 0 to disable re-invocation.",
            ));
        }

        Ok(())
    }

    /// Copy of this configuration for another handler instance
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn rule_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.rule_retry_attempts,
            Duration::from_millis(self.rule_retry_backoff_ms),
        )
    }
}

fn parse_number<T>(key: &str, raw: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid_value(key, raw, e))
}

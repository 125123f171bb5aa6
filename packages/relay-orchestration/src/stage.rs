use relay_backends::BackendKind;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Stage tag of a deployed handler instance
///
/// Parsing is total: unrecognized tags become `Unknown` and route to the
/// default terminal action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    Queue,
    Topic,
    Bus,
    Terminal,
    Unknown(String),
}

impl Stage {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "sqs" => Stage::Queue,
            "topic" | "sns" => Stage::Topic,
            "bus" | "bridge" => Stage::Bus,
            "terminal" | "end" => Stage::Terminal,
            _ => Stage::Unknown(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Stage::Queue => "queue",
            Stage::Topic => "topic",
            Stage::Bus => "bus",
            Stage::Terminal => "terminal",
            Stage::Unknown(raw) => raw,
        }
    }

    /// Forwarding action for this stage
    pub fn action(&self) -> Action {
        match self {
            Stage::Queue => Action::ForwardToQueue,
            Stage::Topic => Action::ForwardToTopic,
            Stage::Bus => Action::ForwardToBus,
            Stage::Terminal => Action::Terminal,
            Stage::Unknown(raw) => Action::DefaultTerminal {
                requested: raw.clone(),
            },
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Unknown("Unknown".to_string())
    }
}

impl From<String> for Stage {
    fn from(s: String) -> Self {
        Stage::parse(&s)
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.as_str().to_string()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a hop does after resolving its stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ForwardToQueue,
    ForwardToTopic,
    ForwardToBus,
    /// Configured end of the chain
    Terminal,
    /// Fallback for a misconfigured stage; no forwarding, receipt still logged
    DefaultTerminal { requested: String },
}

impl Action {
    /// Backend the action forwards to, `None` for both terminal variants
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Action::ForwardToQueue => Some(BackendKind::Queue),
            Action::ForwardToTopic => Some(BackendKind::Topic),
            Action::ForwardToBus => Some(BackendKind::Bus),
            Action::Terminal | Action::DefaultTerminal { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.backend().is_none()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::ForwardToQueue => "forward_to_queue",
            Action::ForwardToTopic => "forward_to_topic",
            Action::ForwardToBus => "forward_to_bus",
            Action::Terminal => "terminal",
            Action::DefaultTerminal { .. } => "default_terminal",
        }
    }
}

/// Stage name to action
pub struct StageRouter;

impl StageRouter {
    /// Total: never fails, unknown names fall back to `DefaultTerminal`
    pub fn resolve(stage_name: &str) -> Action {
        Self::route(&Stage::parse(stage_name))
    }

    /// Action for an already parsed stage
    pub fn route(stage: &Stage) -> Action {
        let action = stage.action();
        match &action {
            Action::DefaultTerminal { requested } => {
                info!(stage = %requested, "unrecognized stage, no forwarding")
            }
            other => info!(action = other.name(), "stage resolved"),
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_stages_resolve_to_adapters() {
        assert_eq!(StageRouter::resolve("queue"), Action::ForwardToQueue);
        assert_eq!(StageRouter::resolve("topic"), Action::ForwardToTopic);
        assert_eq!(StageRouter::resolve("bus"), Action::ForwardToBus);
        assert_eq!(StageRouter::resolve("terminal"), Action::Terminal);
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(StageRouter::resolve("sqs"), Action::ForwardToQueue);
        assert_eq!(StageRouter::resolve("sns"), Action::ForwardToTopic);
        assert_eq!(StageRouter::resolve("bridge"), Action::ForwardToBus);
        assert_eq!(StageRouter::resolve("end"), Action::Terminal);
    }

    #[test]
    fn test_parsing_ignores_case_and_whitespace() {
        assert_eq!(Stage::parse(" Queue "), Stage::Queue);
        assert_eq!(Stage::parse("BUS"), Stage::Bus);
    }

    #[test]
    fn test_unknown_falls_back_to_default_terminal() {
        for name in ["", "foo", "unknown", "Unknown", "queues"] {
            let action = StageRouter::resolve(name);
            assert_eq!(
                action,
                Action::DefaultTerminal {
                    requested: name.to_string()
                }
            );
            assert!(action.is_terminal());
        }
    }

    #[test]
    fn test_action_backend() {
        assert_eq!(Action::ForwardToQueue.backend(), Some(BackendKind::Queue));
        assert_eq!(Action::ForwardToTopic.backend(), Some(BackendKind::Topic));
        assert_eq!(Action::ForwardToBus.backend(), Some(BackendKind::Bus));
        assert_eq!(Action::Terminal.backend(), None);
    }

    #[test]
    fn test_stage_string_roundtrip() {
        for stage in [Stage::Queue, Stage::Topic, Stage::Bus, Stage::Terminal] {
            let s: String = stage.clone().into();
            assert_eq!(Stage::from(s), stage);
        }
    }

    #[test]
    fn test_stage_serde_uses_plain_strings() {
        let stage: Stage = serde_json::from_str("\"sqs\"").unwrap();
        assert_eq!(stage, Stage::Queue);
        assert_eq!(serde_json::to_string(&Stage::Topic).unwrap(), "\"topic\"");

        let unknown: Stage = serde_json::from_str("\"foo\"").unwrap();
        assert_eq!(unknown, Stage::Unknown("foo".to_string()));
    }
}

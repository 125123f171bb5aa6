use std::collections::{HashMap, HashSet};
use std::time::Duration;

use relay_backends::{BackendKind, EventPattern};

use crate::adapters::{BUS_DETAIL_TYPE, BUS_SOURCE};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::retry::RetryPolicy;
use crate::stage::Stage;

/// Name of the rule routing relay entries to the terminal stage
pub const DEFAULT_RULE_NAME: &str = "publish-to-bridge";

/// Default interval of the scheduled entry point
pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(60);

/// One deployed handler instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub name: String,
    pub stage: Stage,
}

impl StageNode {
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            stage,
        }
    }
}

/// Backend wiring between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Queue {
        queue: String,
    },
    Topic {
        topic: String,
    },
    BusRule {
        rule: String,
        pattern: EventPattern,
        retry: RetryPolicy,
    },
}

impl Channel {
    pub fn backend(&self) -> BackendKind {
        match self {
            Channel::Queue { .. } => BackendKind::Queue,
            Channel::Topic { .. } => BackendKind::Topic,
            Channel::BusRule { .. } => BackendKind::Bus,
        }
    }

    fn describe(&self) -> String {
        match self {
            Channel::Queue { queue } => format!("queue({})", queue),
            Channel::Topic { topic } => format!("topic({})", topic),
            Channel::BusRule { rule, retry, .. } => {
                format!("rule({}, retries={})", rule, retry.retry_attempts)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub channel: Channel,
}

/// Scheduled trigger feeding the entry node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub target: String,
    pub interval: Duration,
}

/// Validated hop graph of the pipeline
///
/// Purely descriptive: traversals never consult it. The local runtime uses
/// it to decide which handler listens on which backend.
#[derive(Debug, Clone)]
pub struct PipelineTopology {
    nodes: HashMap<String, StageNode>,
    edges: Vec<Edge>,
    schedule: Option<Schedule>,
    order: Vec<String>,
}

impl PipelineTopology {
    /// Build and validate a topology
    ///
    /// Rejects unknown edge endpoints, channels that disagree with the
    /// sending node's stage, fan-out, cycles, and anything other than a
    /// single terminal sink.
    pub fn new(nodes: Vec<StageNode>, edges: Vec<Edge>, schedule: Option<Schedule>) -> Result<Self> {
        let mut node_map = HashMap::new();
        for node in nodes {
            if node_map.contains_key(&node.name) {
                return Err(RelayError::Topology(format!(
                    "Duplicate node {}",
                    node.name
                )));
            }
            node_map.insert(node.name.clone(), node);
        }

        let mut outgoing: HashMap<&str, usize> = HashMap::new();
        for edge in &edges {
            for end in [&edge.from, &edge.to] {
                if !node_map.contains_key(end) {
                    return Err(RelayError::Topology(format!(
                        "Edge {} -> {} references unknown node {}",
                        edge.from, edge.to, end
                    )));
                }
            }

            let sender = &node_map[&edge.from];
            match sender.stage.action().backend() {
                Some(kind) if kind == edge.channel.backend() => {}
                Some(kind) => {
                    return Err(RelayError::Topology(format!(
                        "Node {} forwards to {} but edge uses {}",
                        sender.name,
                        kind,
                        edge.channel.backend()
                    )))
                }
                None => {
                    return Err(RelayError::Topology(format!(
                        "Terminal node {} cannot have outgoing edges",
                        sender.name
                    )))
                }
            }

            *outgoing.entry(edge.from.as_str()).or_default() += 1;
        }

        if let Some((name, _)) = outgoing.iter().find(|(_, &count)| count > 1) {
            return Err(RelayError::Topology(format!(
                "Node {} has more than one outgoing edge",
                name
            )));
        }

        let sinks: Vec<&StageNode> = node_map
            .values()
            .filter(|n| !outgoing.contains_key(n.name.as_str()))
            .collect();
        match sinks.as_slice() {
            [sink] if sink.stage.action().is_terminal() => {}
            [sink] => {
                return Err(RelayError::Topology(format!(
                    "Sink {} forwards to {} but nothing consumes it",
                    sink.name, sink.stage
                )))
            }
            _ => {
                let mut names: Vec<&str> = sinks.iter().map(|n| n.name.as_str()).collect();
                names.sort_unstable();
                return Err(RelayError::Topology(format!(
                    "Expected exactly one terminal sink, found [{}]",
                    names.join(", ")
                )));
            }
        }

        let order = Self::topological_sort(&node_map, &edges)?;

        if let Some(schedule) = &schedule {
            if !node_map.contains_key(&schedule.target) {
                return Err(RelayError::Topology(format!(
                    "Schedule targets unknown node {}",
                    schedule.target
                )));
            }
        }

        Ok(Self {
            nodes: node_map,
            edges,
            schedule,
            order,
        })
    }

    /// Kahn's algorithm; ties broken by name so the plan is stable
    fn topological_sort(nodes: &HashMap<String, StageNode>, edges: &[Edge]) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            nodes.keys().map(|name| (name.as_str(), 0)).collect();
        for edge in edges {
            if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                *degree += 1;
            }
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut processed = HashSet::new();

        while processed.len() < nodes.len() {
            let mut ready: Vec<&str> = in_degree
                .iter()
                .filter(|(name, &degree)| degree == 0 && !processed.contains(*name))
                .map(|(&name, _)| name)
                .collect();

            if ready.is_empty() {
                return Err(RelayError::Topology("Cycle detected in pipeline".to_string()));
            }
            ready.sort_unstable();

            for name in ready {
                processed.insert(name);
                in_degree.remove(name);
                order.push(name.to_string());

                for edge in edges.iter().filter(|e| e.from == name) {
                    if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                        *degree -= 1;
                    }
                }
            }
        }

        Ok(order)
    }

    /// Four-hop chain: queue, topic, bus, terminal
    pub fn default_topology(config: &RelayConfig) -> Result<Self> {
        let nodes = vec![
            StageNode::new("Service01", Stage::Queue),
            StageNode::new("Service02", Stage::Topic),
            StageNode::new("Service03", Stage::Bus),
            StageNode::new("Service04", Stage::Terminal),
        ];
        let edges = vec![
            Edge {
                from: "Service01".to_string(),
                to: "Service02".to_string(),
                channel: Channel::Queue {
                    queue: config.queue_identifier.clone(),
                },
            },
            Edge {
                from: "Service02".to_string(),
                to: "Service03".to_string(),
                channel: Channel::Topic {
                    topic: config.topic_identifier.clone(),
                },
            },
            Edge {
                from: "Service03".to_string(),
                to: "Service04".to_string(),
                channel: Channel::BusRule {
                    rule: DEFAULT_RULE_NAME.to_string(),
                    pattern: EventPattern::new(BUS_SOURCE, BUS_DETAIL_TYPE),
                    retry: config.rule_retry_policy(),
                },
            },
        ];
        let schedule = Schedule {
            target: "Service01".to_string(),
            interval: DEFAULT_SCHEDULE_INTERVAL,
        };

        Self::new(nodes, edges, Some(schedule))
    }

    /// Node names in hop order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn node(&self, name: &str) -> Option<&StageNode> {
        self.nodes.get(name)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Node the scheduler invokes; first node in hop order when unscheduled
    pub fn entry(&self) -> &StageNode {
        let name = match &self.schedule {
            Some(schedule) => &schedule.target,
            None => &self.order[0],
        };
        &self.nodes[name]
    }

    pub fn terminal(&self) -> &StageNode {
        &self.nodes[&self.order[self.order.len() - 1]]
    }

    /// Outgoing edge of `name`, `None` for the sink
    pub fn edge_from(&self, name: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.from == name)
    }

    /// Edges paired with their nodes, in hop order
    pub fn hops(&self) -> impl Iterator<Item = (&StageNode, &Edge, &StageNode)> {
        self.order.iter().filter_map(move |name| {
            let edge = self.edge_from(name)?;
            Some((&self.nodes[&edge.from], edge, &self.nodes[&edge.to]))
        })
    }

    /// Human-readable plan (for logging and the CLI)
    pub fn execution_plan(&self) -> String {
        let mut lines = Vec::with_capacity(self.order.len() + 1);
        if let Some(schedule) = &self.schedule {
            lines.push(format!(
                "Schedule: every {}s -> {}",
                schedule.interval.as_secs(),
                schedule.target
            ));
        }
        for (i, name) in self.order.iter().enumerate() {
            let node = &self.nodes[name];
            let line = match self.edge_from(name) {
                Some(edge) => format!(
                    "Hop {}: {} [{}] --{}--> {}",
                    i + 1,
                    node.name,
                    node.stage,
                    edge.channel.describe(),
                    edge.to
                ),
                None => format!("Hop {}: {} [{}] (end)", i + 1, node.name, node.stage),
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

//! Local runtime
//!
//! Stands in for the hosting platform: one handler per topology node, each
//! woken by the in-memory backend its incoming edge names and forwarding on
//! the channel its outgoing edge names. Queue deliveries are retried by
//! redelivery. Topic and bus rule deliveries are re-invoked through a
//! `RetryPolicy`: `TOPIC_DELIVERY_RETRIES` for topics, the rule's own for the
//! bus. A bus hop that still fails after that is reported, not retried again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_backends::{BackendProvider, BusDelivery, InMemoryBroker, QueueMessage, TopicNotification};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::correlation::{Event, ExecutionContext, TRACKING_ID_KEY};
use crate::error::{RelayError, Result};
use crate::handler::{HopInvoker, HopReport, PipelineHandler};
use crate::retry::RetryPolicy;
use crate::stage::Stage;
use crate::topology::{Channel, PipelineTopology, StageNode};

/// Receives after which a failing queue message is dropped
pub const QUEUE_MAX_RECEIVES: u32 = 3;

/// Re-invocations of a topic subscriber after a failed delivery
pub const TOPIC_DELIVERY_RETRIES: u32 = 2;

/// One finished invocation as seen by the runtime
#[derive(Debug)]
pub struct HopOutcome {
    pub node: String,
    pub stage: Stage,
    /// Invocations spent, retries included
    pub attempts: u32,
    pub result: Result<HopReport>,
}

impl HopOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn report(&self) -> Option<&HopReport> {
        self.result.as_ref().ok()
    }
}

/// Wires handlers to in-memory backends per a topology
pub struct LocalRuntime {
    topology: Arc<PipelineTopology>,
    broker: InMemoryBroker,
    invokers: HashMap<String, Arc<dyn HopInvoker>>,
    topic_retry: RetryPolicy,
}

impl LocalRuntime {
    /// One `PipelineHandler` per node, all sharing `broker`
    pub fn new(config: &RelayConfig, topology: PipelineTopology, broker: InMemoryBroker) -> Self {
        for edge in topology.edges() {
            match &edge.channel {
                Channel::Queue { queue } => {
                    broker.create_queue(queue.as_str());
                }
                Channel::Topic { topic } => {
                    broker.create_topic(topic.as_str());
                }
                Channel::BusRule { .. } => {}
            }
        }

        let provider: Arc<dyn BackendProvider> = Arc::new(broker.clone());
        let invokers = topology
            .order()
            .iter()
            .filter_map(|name| topology.node(name))
            .map(|node| {
                let config = Arc::new(node_config(config, &topology, node));
                let handler: Arc<dyn HopInvoker> =
                    Arc::new(PipelineHandler::new(config, provider.clone()));
                (node.name.clone(), handler)
            })
            .collect();

        Self {
            topology: Arc::new(topology),
            broker,
            invokers,
            topic_retry: RetryPolicy::new(
                TOPIC_DELIVERY_RETRIES,
                Duration::from_millis(config.rule_retry_backoff_ms),
            ),
        }
    }

    /// Default four-hop topology over a fresh broker
    pub fn with_defaults(config: &RelayConfig) -> Result<Self> {
        let topology = PipelineTopology::default_topology(config)?;
        Ok(Self::new(config, topology, InMemoryBroker::new()))
    }

    /// Replace the invoker serving `node`
    pub fn with_invoker(mut self, node: &str, invoker: Arc<dyn HopInvoker>) -> Result<Self> {
        if self.topology.node(node).is_none() {
            return Err(RelayError::Topology(format!("Unknown node {}", node)));
        }
        self.invokers.insert(node.to_string(), invoker);
        Ok(self)
    }

    pub fn topology(&self) -> &PipelineTopology {
        &self.topology
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Subscribe every non-entry node and spawn its delivery loop
    ///
    /// Subscriptions are in place before this returns, so nothing published
    /// afterwards is missed.
    pub fn start(self) -> Result<RuntimeHandle> {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        info!("Starting local runtime:\n{}", self.topology.execution_plan());

        for edge in self.topology.edges() {
            let target = self.topology.node(&edge.to).ok_or_else(|| {
                RelayError::Topology(format!("Unknown node {}", edge.to))
            })?;
            let invoker = self.invoker(&edge.to)?;
            let listener = Listener {
                node: target.name.clone(),
                stage: target.stage.clone(),
                invoker,
                outcomes: outcomes_tx.clone(),
            };

            let task = match &edge.channel {
                Channel::Queue { queue } => {
                    let queue = self.broker.create_queue(queue.as_str());
                    tokio::spawn(async move {
                        while let Some(message) = queue.recv().await {
                            if let Some(retry) = listener.on_queue_message(&message).await {
                                queue.redeliver(retry);
                            }
                        }
                        info!(node = %listener.node, "queue listener stopped");
                    })
                }
                Channel::Topic { topic } => {
                    let mut rx = self.broker.create_topic(topic.as_str()).subscribe();
                    let retry = self.topic_retry;
                    tokio::spawn(async move {
                        while let Some(notification) = rx.recv().await {
                            listener.on_topic_notification(notification, retry).await;
                        }
                        info!(node = %listener.node, "topic listener stopped");
                    })
                }
                Channel::BusRule {
                    rule,
                    pattern,
                    retry,
                } => {
                    let mut rx = self.broker.bus().add_rule(rule.as_str(), pattern.clone());
                    let retry = *retry;
                    tokio::spawn(async move {
                        while let Some(delivery) = rx.recv().await {
                            listener.on_bus_delivery(delivery, retry).await;
                        }
                        info!(node = %listener.node, "rule listener stopped");
                    })
                }
            };
            tasks.push(task);
        }

        let entry = self.topology.entry().clone();
        let entry_invoker = self.invoker(&entry.name)?;
        Ok(RuntimeHandle {
            entry: Listener {
                node: entry.name,
                stage: entry.stage,
                invoker: entry_invoker,
                outcomes: outcomes_tx,
            },
            outcomes: Mutex::new(outcomes_rx),
            tasks,
            broker: self.broker,
        })
    }

    fn invoker(&self, node: &str) -> Result<Arc<dyn HopInvoker>> {
        self.invokers
            .get(node)
            .cloned()
            .ok_or_else(|| RelayError::Runtime(format!("No invoker registered for {}", node)))
    }
}

/// Running pipeline
pub struct RuntimeHandle {
    entry: Listener,
    outcomes: Mutex<mpsc::UnboundedReceiver<HopOutcome>>,
    tasks: Vec<JoinHandle<()>>,
    broker: InMemoryBroker,
}

impl RuntimeHandle {
    /// Invoke the entry node directly, as the scheduler would
    ///
    /// The full error goes to the outcome stream; the caller gets a summary.
    pub async fn inject(&self, event: Event) -> Result<HopReport> {
        let result = self
            .entry
            .invoker
            .invoke(event, ExecutionContext::default())
            .await;
        let report = match &result {
            Ok(report) => Ok(report.clone()),
            Err(e) => Err(RelayError::Runtime(e.to_string())),
        };
        self.entry.emit(1, result);
        report
    }

    /// Next finished invocation from any node
    pub async fn next_outcome(&self) -> Option<HopOutcome> {
        self.outcomes.lock().await.recv().await
    }

    /// Wait until `node` finishes an invocation, collecting everything seen
    pub async fn wait_for(&self, node: &str) -> Vec<HopOutcome> {
        let mut outcomes = self.outcomes.lock().await;
        let mut seen = Vec::new();
        while let Some(outcome) = outcomes.recv().await {
            let done = outcome.node == node;
            seen.push(outcome);
            if done {
                break;
            }
        }
        seen
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Close every backend, wait for listeners to drain, return leftovers
    pub async fn shutdown(mut self) -> Vec<HopOutcome> {
        self.broker.shutdown();
        for result in futures::future::join_all(self.tasks.drain(..)).await {
            if let Err(join_err) = result {
                error!("listener task panicked: {}", join_err);
            }
        }

        let mut remaining = Vec::new();
        while let Ok(outcome) = self.outcomes.get_mut().try_recv() {
            remaining.push(outcome);
        }
        info!(remaining = remaining.len(), "local runtime stopped");
        remaining
    }
}

/// Delivery loop state for one node
struct Listener {
    node: String,
    stage: Stage,
    invoker: Arc<dyn HopInvoker>,
    outcomes: mpsc::UnboundedSender<HopOutcome>,
}

impl Listener {
    /// Returns the message when it should be redelivered
    async fn on_queue_message(&self, message: &QueueMessage) -> Option<QueueMessage> {
        let event = tracking_event(&message.body);
        let result = self.invoker.invoke(event, ExecutionContext::default()).await;

        let retry = match &result {
            Err(e) if message.receive_count < QUEUE_MAX_RECEIVES => {
                warn!(
                    node = %self.node,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "{}, redelivering",
                    e
                );
                Some(message.clone())
            }
            _ => None,
        };
        // Only the final receive is reported
        if retry.is_none() {
            self.emit(message.receive_count, result);
        }
        retry
    }

    async fn on_topic_notification(&self, notification: TopicNotification, retry: RetryPolicy) {
        let event = tracking_event(&notification.message);

        let mut attempts = 0;
        let result = retry
            .run(|_| {
                attempts += 1;
                self.invoker.invoke(event.clone(), ExecutionContext::default())
            })
            .await;
        self.emit(attempts, result);
    }

    async fn on_bus_delivery(&self, delivery: BusDelivery, retry: RetryPolicy) {
        let event = match delivery.entry.detail {
            Value::Object(detail) => detail,
            other => {
                warn!(node = %self.node, rule = %delivery.rule, "non-object detail: {}", other);
                Event::new()
            }
        };
        let exec = ExecutionContext::new(delivery.entry.trace_header);

        let mut attempts = 0;
        let result = retry
            .run(|_| {
                attempts += 1;
                self.invoker.invoke(event.clone(), exec.clone())
            })
            .await;
        self.emit(attempts, result);
    }

    fn emit(&self, attempts: u32, result: Result<HopReport>) {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(node = %self.node, attempts, "invocation failed: {}", e);
            } else {
                warn!(node = %self.node, attempts, "invocation failed: {}", e);
            }
        }

        let outcome = HopOutcome {
            node: self.node.clone(),
            stage: self.stage.clone(),
            attempts,
            result,
        };
        if self.outcomes.send(outcome).is_err() {
            warn!(node = %self.node, "outcome dropped, runtime handle gone");
        }
    }
}

/// Handler config for `node`, addressing the channel of its outgoing edge
fn node_config(base: &RelayConfig, topology: &PipelineTopology, node: &StageNode) -> RelayConfig {
    let mut config = base.for_stage(node.stage.clone());
    match topology.edge_from(&node.name).map(|edge| &edge.channel) {
        Some(Channel::Queue { queue }) => config.queue_identifier = queue.clone(),
        Some(Channel::Topic { topic }) => config.topic_identifier = topic.clone(),
        Some(Channel::BusRule { .. }) | None => {}
    }
    config
}

fn tracking_event(tracking_id: &str) -> Event {
    let mut event = Event::new();
    event.insert(
        TRACKING_ID_KEY.to_string(),
        Value::String(tracking_id.to_string()),
    );
    event
}

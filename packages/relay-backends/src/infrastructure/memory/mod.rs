//! In-memory messaging backends
//!
//! `InMemoryBroker` owns named queues, named topics and a single event bus,
//! and implements every client port plus `BackendProvider`. Backends can be
//! marked unavailable to exercise client-construction failures.

mod bus;
mod queue;
mod topic;

pub use bus::{BusDelivery, InMemoryBus};
pub use queue::InMemoryQueue;
pub use topic::InMemoryTopic;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{
    BackendKind, BackendProvider, BusClient, BusEntry, PublishReceipt, PutEventsOutput,
    QueueClient, SendReceipt, TopicClient,
};
use crate::{BackendError, Result};

#[derive(Default)]
struct BrokerInner {
    queues: RwLock<HashMap<String, Arc<InMemoryQueue>>>,
    topics: RwLock<HashMap<String, Arc<InMemoryTopic>>>,
    bus: Arc<InMemoryBus>,
    unavailable: RwLock<HashSet<BackendKind>>,
}

/// Cheaply cloneable handle to a set of in-memory backends
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(self, name: impl Into<String>) -> Self {
        self.create_queue(name);
        self
    }

    pub fn with_topic(self, name: impl Into<String>) -> Self {
        self.create_topic(name);
        self
    }

    /// Get or create a named queue
    pub fn create_queue(&self, name: impl Into<String>) -> Arc<InMemoryQueue> {
        let name = name.into();
        self.inner
            .queues
            .write()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(InMemoryQueue::new(name)))
            .clone()
    }

    /// Get or create a named topic
    pub fn create_topic(&self, name: impl Into<String>) -> Arc<InMemoryTopic> {
        let name = name.into();
        self.inner
            .topics
            .write()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(InMemoryTopic::new(name)))
            .clone()
    }

    pub fn queue(&self, name: &str) -> Option<Arc<InMemoryQueue>> {
        self.inner.queues.read().get(name).cloned()
    }

    pub fn topic(&self, name: &str) -> Option<Arc<InMemoryTopic>> {
        self.inner.topics.read().get(name).cloned()
    }

    pub fn bus(&self) -> Arc<InMemoryBus> {
        self.inner.bus.clone()
    }

    /// Make client construction for `kind` fail until `set_available`
    pub fn set_unavailable(&self, kind: BackendKind) {
        self.inner.unavailable.write().insert(kind);
    }

    pub fn set_available(&self, kind: BackendKind) {
        self.inner.unavailable.write().remove(&kind);
    }

    /// Close every destination so pending consumers drain and stop
    pub fn shutdown(&self) {
        for queue in self.inner.queues.read().values() {
            queue.close();
        }
        for topic in self.inner.topics.read().values() {
            topic.close();
        }
        self.inner.bus.close();
    }

    fn check_available(&self, kind: BackendKind) -> Result<()> {
        if self.inner.unavailable.read().contains(&kind) {
            return Err(BackendError::unavailable(format!(
                "{} client is unavailable",
                kind
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for InMemoryBroker {
    async fn send_message(&self, queue: &str, body: &str) -> Result<SendReceipt> {
        let target = self
            .queue(queue)
            .ok_or_else(|| BackendError::rejected(format!("NonExistentQueue: {}", queue)))?;
        target.send(body)
    }
}

#[async_trait]
impl TopicClient for InMemoryBroker {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<PublishReceipt> {
        let target = self
            .topic(topic)
            .ok_or_else(|| BackendError::rejected(format!("NotFound: topic {}", topic)))?;
        target.publish(subject, message)
    }
}

#[async_trait]
impl BusClient for InMemoryBroker {
    async fn put_events(&self, entries: Vec<BusEntry>) -> Result<PutEventsOutput> {
        self.inner.bus.put_events(entries)
    }
}

impl BackendProvider for InMemoryBroker {
    fn queue_client(&self) -> Result<Arc<dyn QueueClient>> {
        self.check_available(BackendKind::Queue)?;
        Ok(Arc::new(self.clone()))
    }

    fn topic_client(&self) -> Result<Arc<dyn TopicClient>> {
        self.check_available(BackendKind::Topic)?;
        Ok(Arc::new(self.clone()))
    }

    fn bus_client(&self) -> Result<Arc<dyn BusClient>> {
        self.check_available(BackendKind::Bus)?;
        Ok(Arc::new(self.clone()))
    }
}

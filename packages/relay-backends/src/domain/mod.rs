//! Domain layer for messaging backends
//!
//! # Domain Models
//!
//! - `QueueMessage` / `SendReceipt`: work queue message and its acceptance receipt
//! - `TopicNotification` / `PublishReceipt`: broadcast topic delivery and receipt
//! - `BusEntry` / `PutEventsOutput`: structured event bus entry and batch response
//! - `EventPattern`: source/detail-type matcher used by bus rules
//!
//! # Port Traits
//!
//! - `QueueClient`, `TopicClient`, `BusClient`: one capability per primitive
//! - `BackendProvider`: constructs clients on demand
//!
//! # Examples
//!
//! ```rust,ignore
//! use relay_backends::domain::{BackendProvider, BusEntry};
//!
//! async fn example(provider: &dyn BackendProvider) -> relay_backends::Result<()> {
//!     let queue = provider.queue_client()?;
//!     let receipt = queue.send_message("sqs-poc", "id-42").await?;
//!
//!     let bus = provider.bus_client()?;
//!     let output = bus
//!         .put_events(vec![BusEntry::new("svc", "svc", serde_json::json!({}))])
//!         .await?;
//!     assert_eq!(output.failed_entry_count, 0);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Messaging primitive behind a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Queue,
    Topic,
    Bus,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Queue => "queue",
            BackendKind::Topic => "topic",
            BackendKind::Bus => "bus",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message sitting in a work queue
///
/// `receive_count` grows on every delivery; a value above 1 means the
/// consumer is seeing a redelivery and must be idempotent on the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub queue: String,
    pub body: String,
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(queue: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            queue: queue.into(),
            body: body.into(),
            receive_count: 0,
            sent_at: Utc::now(),
        }
    }
}

/// Acknowledgement returned when a queue accepts a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// One delivery of a topic publish to one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNotification {
    pub message_id: String,
    pub topic: String,
    pub subject: Option<String>,
    pub message: String,
    pub published_at: DateTime<Utc>,
}

/// Acknowledgement returned when a topic accepts a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub message_id: String,
    /// Subscribers the publish was handed to
    pub delivered_to: usize,
}

/// Structured event bus entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEntry {
    pub source: String,
    pub detail_type: String,
    pub detail: serde_json::Value,
    /// Opaque distributed-trace token carried for downstream correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_header: Option<String>,
}

impl BusEntry {
    pub fn new(
        source: impl Into<String>,
        detail_type: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            detail,
            trace_header: None,
        }
    }

    pub fn with_trace_header(mut self, trace_header: Option<String>) -> Self {
        self.trace_header = trace_header;
        self
    }
}

/// Per-entry outcome of a `put_events` call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PutEventsResultEntry {
    pub event_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PutEventsResultEntry {
    pub fn accepted(event_id: String) -> Self {
        Self {
            event_id: Some(event_id),
            ..Default::default()
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error_code.is_some()
    }
}

/// Batch response of a `put_events` call
///
/// The call itself can succeed while individual entries fail; callers must
/// check `failed_entry_count`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PutEventsOutput {
    pub failed_entry_count: usize,
    pub entries: Vec<PutEventsResultEntry>,
}

impl PutEventsOutput {
    pub fn from_entries(entries: Vec<PutEventsResultEntry>) -> Self {
        let failed_entry_count = entries.iter().filter(|e| e.is_failure()).count();
        Self {
            failed_entry_count,
            entries,
        }
    }
}

/// Bus rule pattern
///
/// An empty list matches any value for that field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventPattern {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub detail_type: Vec<String>,
}

impl EventPattern {
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            source: vec![source.into()],
            detail_type: vec![detail_type.into()],
        }
    }

    pub fn matches(&self, entry: &BusEntry) -> bool {
        field_matches(&self.source, &entry.source)
            && field_matches(&self.detail_type, &entry.detail_type)
    }
}

fn field_matches(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == value)
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Traits
// ═══════════════════════════════════════════════════════════════════════════

/// Work queue capability
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue one message; delivered to exactly one consumer, at least once
    async fn send_message(&self, queue: &str, body: &str) -> Result<SendReceipt>;
}

/// Broadcast topic capability
#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Publish to every current subscriber of `topic`
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<PublishReceipt>;
}

/// Event bus capability
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Publish a batch of entries
    ///
    /// # Errors
    ///
    /// Transport failures are `Err`. Entry-level rejections are reported in
    /// `PutEventsOutput::failed_entry_count` instead.
    async fn put_events(&self, entries: Vec<BusEntry>) -> Result<PutEventsOutput>;
}

/// Factory for backend clients
///
/// Construction can fail (missing credentials, disabled backend); callers
/// treat that as fatal for the current invocation.
pub trait BackendProvider: Send + Sync {
    fn queue_client(&self) -> Result<Arc<dyn QueueClient>>;

    fn topic_client(&self) -> Result<Arc<dyn TopicClient>>;

    fn bus_client(&self) -> Result<Arc<dyn BusClient>>;
}

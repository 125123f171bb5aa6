//! Relay Backends - messaging capability ports
//!
//! Thin, opaque interfaces over the three messaging primitives an event relay
//! forwards through:
//!
//! 1. **Work queue**: one message, one consumer, at-least-once
//! 2. **Broadcast topic**: fan-out to every current subscriber
//! 3. **Event bus**: structured entries routed to pattern-matching rules
//!
//! Provisioning, authentication and scaling of real backends live outside
//! this crate. The `memory` feature ships in-process implementations used by
//! the local runtime and by tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_backends::{BackendProvider, InMemoryBroker};
//!
//! let broker = InMemoryBroker::new().with_queue("sqs-poc").with_topic("sns-poc");
//! let queue = broker.queue_client()?;
//! queue.send_message("sqs-poc", "id-42").await?;
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "memory")]
pub mod infrastructure;

pub use error::{BackendError, ErrorKind, Result};

pub use domain::{
    BackendKind, BackendProvider, BusClient, BusEntry, EventPattern, PublishReceipt,
    PutEventsOutput, PutEventsResultEntry, QueueClient, QueueMessage, SendReceipt, TopicClient,
    TopicNotification,
};

#[cfg(feature = "memory")]
pub use infrastructure::{BusDelivery, InMemoryBroker, InMemoryBus, InMemoryQueue, InMemoryTopic};

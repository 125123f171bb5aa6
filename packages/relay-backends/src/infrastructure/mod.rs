//! Infrastructure layer - Backend adapters
//!
//! In-process queue, topic and bus used by the local runtime and tests.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{BusDelivery, InMemoryBroker, InMemoryBus, InMemoryQueue, InMemoryTopic};

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::{QueueMessage, SendReceipt};
use crate::{BackendError, Result};

/// In-memory work queue
///
/// Each message is handed to exactly one `recv` caller. `redeliver` puts a
/// received message back to model at-least-once delivery.
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<QueueMessage>,
    closed: bool,
    total_sent: u64,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, body: &str) -> Result<SendReceipt> {
        let message = QueueMessage::new(self.name.clone(), body);
        let receipt = SendReceipt {
            message_id: message.message_id.clone(),
            accepted_at: Utc::now(),
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BackendError::closed(&self.name));
            }
            state.messages.push_back(message);
            state.total_sent += 1;
        }
        self.notify.notify_one();

        debug!(queue = %self.name, message_id = %receipt.message_id, "message enqueued");
        Ok(receipt)
    }

    /// Take the next message without waiting
    pub fn try_recv(&self) -> Option<QueueMessage> {
        let mut state = self.state.lock();
        state.messages.pop_front().map(|mut message| {
            message.receive_count += 1;
            message
        })
    }

    /// Wait for the next message; `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<QueueMessage> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(mut message) = state.messages.pop_front() {
                    message.receive_count += 1;
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Return a received message to the front of the queue
    pub fn redeliver(&self, message: QueueMessage) {
        self.state.lock().messages.push_front(message);
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_sent(&self) -> u64 {
        self.state.lock().total_sent
    }
}

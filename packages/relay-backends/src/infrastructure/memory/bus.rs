use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{
    new_message_id, BusEntry, EventPattern, PutEventsOutput, PutEventsResultEntry,
};
use crate::{BackendError, Result};

/// Entry handed to a rule whose pattern matched
#[derive(Debug, Clone)]
pub struct BusDelivery {
    pub event_id: String,
    pub rule: String,
    pub entry: BusEntry,
    pub delivered_at: DateTime<Utc>,
}

struct RuleRegistration {
    name: String,
    pattern: EventPattern,
    target: mpsc::UnboundedSender<BusDelivery>,
}

/// In-memory event bus with pattern rules
pub struct InMemoryBus {
    rules: Mutex<Vec<RuleRegistration>>,
    archive: Mutex<Vec<BusEntry>>,
    closed: Mutex<bool>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            archive: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }

    /// Register a rule; matching entries arrive on the returned receiver
    pub fn add_rule(
        &self,
        name: impl Into<String>,
        pattern: EventPattern,
    ) -> mpsc::UnboundedReceiver<BusDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.rules.lock().push(RuleRegistration {
            name: name.into(),
            pattern,
            target: tx,
        });
        rx
    }

    pub fn rule_count(&self) -> usize {
        self.rules.lock().len()
    }

    /// Every accepted entry, in publish order
    pub fn archived(&self) -> Vec<BusEntry> {
        self.archive.lock().clone()
    }

    pub fn put_events(&self, entries: Vec<BusEntry>) -> Result<PutEventsOutput> {
        if *self.closed.lock() {
            return Err(BackendError::closed("event bus"));
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.source.is_empty() || entry.detail_type.is_empty() {
                warn!(
                    source = %entry.source,
                    detail_type = %entry.detail_type,
                    "bus entry rejected"
                );
                results.push(PutEventsResultEntry::failed(
                    "ValidationException",
                    "source and detail_type must be non-empty",
                ));
                continue;
            }

            let event_id = new_message_id();
            self.route(&event_id, &entry);
            self.archive.lock().push(entry);
            results.push(PutEventsResultEntry::accepted(event_id));
        }

        Ok(PutEventsOutput::from_entries(results))
    }

    fn route(&self, event_id: &str, entry: &BusEntry) {
        let mut rules = self.rules.lock();
        rules.retain(|rule| {
            if !rule.pattern.matches(entry) {
                return true;
            }
            debug!(rule = %rule.name, event_id, "bus rule matched");
            rule.target
                .send(BusDelivery {
                    event_id: event_id.to_string(),
                    rule: rule.name.clone(),
                    entry: entry.clone(),
                    delivered_at: Utc::now(),
                })
                .is_ok()
        });
    }

    pub fn close(&self) {
        *self.closed.lock() = true;
        self.rules.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge_entry() -> BusEntry {
        BusEntry::new(
            "publish_to_bridge",
            "publish_to_bridge",
            json!({"calling_function": "publish_to_bridge"}),
        )
    }

    #[tokio::test]
    async fn test_matching_rule_receives_entry() {
        let bus = InMemoryBus::new();
        let mut rx = bus.add_rule(
            "to-terminal",
            EventPattern::new("publish_to_bridge", "publish_to_bridge"),
        );

        let output = bus.put_events(vec![bridge_entry()]).unwrap();
        assert_eq!(output.failed_entry_count, 0);

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.rule, "to-terminal");
        assert_eq!(delivery.entry.source, "publish_to_bridge");
        assert_eq!(
            output.entries[0].event_id.as_deref(),
            Some(delivery.event_id.as_str())
        );
    }

    #[test]
    fn test_non_matching_rule_is_skipped() {
        let bus = InMemoryBus::new();
        let mut rx = bus.add_rule("other", EventPattern::new("billing", "invoice"));

        bus.put_events(vec![bridge_entry()]).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.archived().len(), 1);
    }

    #[test]
    fn test_invalid_entry_is_reported_not_raised() {
        let bus = InMemoryBus::new();
        let output = bus
            .put_events(vec![BusEntry::new("", "x", json!({})), bridge_entry()])
            .unwrap();

        assert_eq!(output.failed_entry_count, 1);
        assert!(output.entries[0].is_failure());
        assert!(!output.entries[1].is_failure());
    }

    #[test]
    fn test_closed_bus_rejects_calls() {
        let bus = InMemoryBus::new();
        bus.close();
        assert!(bus.put_events(vec![bridge_entry()]).is_err());
    }
}

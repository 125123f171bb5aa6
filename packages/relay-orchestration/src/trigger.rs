use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::correlation::Event;

/// Fixed-interval trigger emitting an empty event per tick
///
/// The first tick fires immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTrigger {
    pub interval: Duration,
    /// `None` runs until the caller drops the future
    pub max_ticks: Option<u64>,
}

impl ScheduleTrigger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_ticks: None,
        }
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    /// Call `fire` once per tick with the tick number and an empty event
    ///
    /// Returns the number of ticks fired. A slow `fire` delays later ticks
    /// rather than bunching them up.
    pub async fn run<F, Fut>(&self, mut fire: F) -> u64
    where
        F: FnMut(u64, Event) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        while self.max_ticks.map_or(true, |max| ticks < max) {
            interval.tick().await;
            ticks += 1;
            info!(tick = ticks, "schedule fired");
            fire(ticks, Event::new()).await;
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_max_ticks_with_empty_events() {
        let trigger = ScheduleTrigger::new(Duration::from_secs(60)).with_max_ticks(3);
        let mut seen = Vec::new();

        let started = tokio::time::Instant::now();
        let fired = trigger
            .run(|tick, event| {
                seen.push((tick, event.is_empty()));
                async {}
            })
            .await;

        assert_eq!(fired, 3);
        assert_eq!(seen, vec![(1, true), (2, true), (3, true)]);
        // first tick is immediate
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_zero_ticks() {
        let trigger = ScheduleTrigger::new(Duration::from_millis(1)).with_max_ticks(0);
        assert_eq!(trigger.run(|_, _| async {}).await, 0);
    }
}

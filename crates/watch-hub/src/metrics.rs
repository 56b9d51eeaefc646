//! Prometheus metrics for the broadcast hub.

use crate::error::HubError;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Hub metrics, registered on a registry owned by the hub.
#[derive(Debug, Clone)]
pub struct HubMetrics {
    registry: Registry,
    /// Currently registered subscribers
    pub subscribers: IntGauge,
    /// Partitions with a running watcher
    pub active_watchers: IntGauge,
    /// Messages enqueued onto subscriber queues
    pub messages_delivered: IntCounter,
    /// Subscribers removed because their queue overflowed
    pub forced_disconnects: IntCounter,
    /// Watch streams reopened after an unexpected end
    pub watch_restarts: IntCounter,
}

impl HubMetrics {
    /// Creates and registers the hub metrics on a fresh registry.
    pub fn new() -> Result<Self, HubError> {
        let registry = Registry::new();

        let subscribers = IntGauge::new("watch_hub_subscribers", "Currently registered subscribers")?;
        let active_watchers = IntGauge::new("watch_hub_active_watchers", "Partitions with a running watcher")?;
        let messages_delivered = IntCounter::new(
            "watch_hub_messages_delivered_total",
            "Messages enqueued onto subscriber queues",
        )?;
        let forced_disconnects = IntCounter::new(
            "watch_hub_forced_disconnects_total",
            "Subscribers removed because their queue overflowed",
        )?;
        let watch_restarts = IntCounter::new(
            "watch_hub_watch_restarts_total",
            "Watch streams reopened after an unexpected end",
        )?;

        registry.register(Box::new(subscribers.clone()))?;
        registry.register(Box::new(active_watchers.clone()))?;
        registry.register(Box::new(messages_delivered.clone()))?;
        registry.register(Box::new(forced_disconnects.clone()))?;
        registry.register(Box::new(watch_restarts.clone()))?;

        Ok(Self {
            registry,
            subscribers,
            active_watchers,
            messages_delivered,
            forced_disconnects,
            watch_restarts,
        })
    }

    /// Renders all hub metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, HubError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests fail loudly on unexpected errors")]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_all_metrics() {
        let metrics = HubMetrics::new().unwrap();
        metrics.subscribers.set(3);
        metrics.forced_disconnects.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("watch_hub_subscribers 3"));
        assert!(text.contains("watch_hub_forced_disconnects_total 1"));
        assert!(text.contains("watch_hub_active_watchers 0"));
        assert!(text.contains("watch_hub_watch_restarts_total 0"));
    }
}

//! Heartbeat ticker.
//!
//! Broadcasts a heartbeat to every live subscriber at a fixed interval so idle
//! connections carry traffic and half-open ones are detected by the transport.

use crate::hub::Hub;
use crate::message::OutboundMessage;
use crate::source::WatchSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest accepted heartbeat interval.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the process-wide heartbeat task.
///
/// The first heartbeat goes out one full `interval` after start. Intervals
/// below [`MIN_HEARTBEAT_INTERVAL`] are raised to it. The task ends when the
/// hub shuts down.
pub fn spawn_heartbeat<S: WatchSource>(hub: Arc<Hub<S>>, interval: Duration) -> JoinHandle<()> {
    let shutdown = hub.shutdown_token();
    if interval < MIN_HEARTBEAT_INTERVAL {
        warn!("Heartbeat interval {:?} too short, using {:?}", interval, MIN_HEARTBEAT_INTERVAL);
    }
    let interval = interval.max(MIN_HEARTBEAT_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Heartbeat ticker started ({:?} interval)", interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = hub.stats();
                    debug!("Sending heartbeat to {} subscriber(s)", stats.subscribers);
                    hub.broadcast_all(OutboundMessage::heartbeat());
                }
            }
        }

        info!("Heartbeat ticker stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests fail loudly on unexpected errors")]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::message::MessageKind;
    use crate::mock::{wait_until, MockWatchSource};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reaches_all_partitions_each_interval() {
        let source = MockWatchSource::new();
        let hub = Hub::new(source, HubConfig::default()).unwrap();

        let mut prod = hub.subscribe("prod").unwrap();
        let mut dev = hub.subscribe("dev").unwrap();
        wait_until(|| hub.is_live(&prod.id()) && hub.is_live(&dev.id())).await;

        let started = Instant::now();
        let ticker = spawn_heartbeat(Arc::clone(&hub), Duration::from_secs(30));

        let first = prod.recv().await.unwrap();
        assert_eq!(first.kind, MessageKind::Heartbeat);
        assert!(first.partition.is_none());
        assert!(started.elapsed() >= Duration::from_secs(30));

        assert_eq!(dev.recv().await.unwrap().kind, MessageKind::Heartbeat);
        assert_eq!(prod.recv().await.unwrap().kind, MessageKind::Heartbeat);
        assert!(started.elapsed() >= Duration::from_secs(60));

        hub.shutdown().await;
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let hub = Hub::new(MockWatchSource::new(), HubConfig::default()).unwrap();
        let mut subscriber = hub.subscribe("prod").unwrap();
        wait_until(|| hub.is_live(&subscriber.id())).await;

        let started = Instant::now();
        let ticker = spawn_heartbeat(Arc::clone(&hub), Duration::ZERO);

        assert_eq!(subscriber.recv().await.unwrap().kind, MessageKind::Heartbeat);
        assert!(started.elapsed() >= MIN_HEARTBEAT_INTERVAL);

        hub.shutdown().await;
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_stops_on_shutdown() {
        let hub = Hub::new(MockWatchSource::new(), HubConfig::default()).unwrap();
        let ticker = spawn_heartbeat(Arc::clone(&hub), Duration::from_secs(3600));

        hub.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .expect("heartbeat did not stop")
            .unwrap();
    }
}

//! Broadcast hub.
//!
//! The hub owns the registry mapping each partition to its subscribers and to
//! its single partition watcher. Every registry mutation happens under one
//! mutex, so a partition has a watcher exactly when it has at least one
//! subscriber. The lock is never held across an `.await`; fan-out uses
//! non-blocking `try_send`, so no subscriber can stall the others.
//!
//! New subscribers start in a *pending* state: live events are buffered while
//! the initial snapshot is enqueued by a background task, then flushed in
//! order once the snapshot is complete.

use crate::backoff::RetryBackoff;
use crate::error::HubError;
use crate::message::{MessageKind, OutboundMessage};
use crate::metrics::HubMetrics;
use crate::source::WatchSource;
use crate::subscriber::{Subscriber, SubscriberId};
use crate::watcher::PartitionWatcher;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for the hub and its partition watchers.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue
    pub queue_capacity: usize,
    /// Delay before the first attempt to reopen a broken watch stream
    pub retry_delay: Duration,
    /// Upper bound for the reopen delay under repeated failures
    pub retry_max_delay: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            retry_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

/// Point-in-time registry counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Partitions with at least one subscriber
    pub partitions: usize,
    /// Registered subscribers across all partitions
    pub subscribers: usize,
    /// Running partition watchers
    pub watchers: usize,
}

type QueueSender = mpsc::Sender<Arc<OutboundMessage>>;

enum Delivery {
    /// Initial snapshot in flight; live messages are held back in order.
    Pending(Vec<Arc<OutboundMessage>>),
    Live,
}

struct Member {
    queue: QueueSender,
    closed: CancellationToken,
    delivery: Delivery,
}

struct WatcherHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Unsubscribed,
    SlowConsumer,
    Disconnected,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, HashMap<SubscriberId, Member>>,
    watchers: HashMap<String, WatcherHandle>,
    members: HashMap<SubscriberId, String>,
    next_generation: u64,
    shutting_down: bool,
}

impl Registry {
    fn assert_consistent(&self, partition: &str) {
        let has_subscribers = self.subscribers.contains_key(partition);
        let has_watcher = self.watchers.contains_key(partition);
        assert!(
            has_subscribers == has_watcher,
            "hub registry invariant violated for partition {}: subscribers={} watcher={}",
            partition,
            has_subscribers,
            has_watcher
        );
    }
}

/// Central registry and fan-out point for partitioned broadcasts.
pub struct Hub<S: WatchSource> {
    source: Arc<S>,
    config: HubConfig,
    registry: Mutex<Registry>,
    metrics: HubMetrics,
    shutdown: CancellationToken,
}

impl<S: WatchSource> fmt::Debug for Hub<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<S: WatchSource> Hub<S> {
    /// Creates a new hub over a watch source.
    pub fn new(source: S, mut config: HubConfig) -> Result<Arc<Self>, HubError> {
        config.queue_capacity = config.queue_capacity.max(1);
        Ok(Arc::new(Self {
            source: Arc::new(source),
            config,
            registry: Mutex::new(Registry::default()),
            metrics: HubMetrics::new()?,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Prometheus metrics maintained by this hub.
    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    /// Token cancelled when the hub begins shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Registers a new subscriber for `partition`.
    ///
    /// The first subscriber of a partition starts its watcher. The current
    /// state of the partition is enqueued onto the new subscriber's queue in
    /// the background, ahead of any live event; if it cannot be listed, an
    /// error message is enqueued instead and the subscription stays valid.
    pub fn subscribe(self: &Arc<Self>, partition: impl Into<String>) -> Result<Subscriber, HubError> {
        let partition = partition.into();
        let id = SubscriberId::generate();
        let (queue, receiver) = mpsc::channel(self.config.queue_capacity);
        let closed = CancellationToken::new();

        {
            let mut registry = self.registry.lock();
            if registry.shutting_down {
                return Err(HubError::ShuttingDown);
            }

            let first = !registry.subscribers.contains_key(&partition);
            registry.subscribers.entry(partition.clone()).or_default().insert(
                id,
                Member {
                    queue: queue.clone(),
                    closed: closed.clone(),
                    delivery: Delivery::Pending(Vec::new()),
                },
            );
            registry.members.insert(id, partition.clone());
            if first {
                self.start_watcher_locked(&mut registry, &partition);
            }
            self.metrics.subscribers.inc();
        }

        info!(subscriber_id = %id, partition = %partition, "Subscriber registered");

        let hub = Arc::clone(self);
        let snapshot_partition = partition.clone();
        let snapshot_closed = closed.clone();
        tokio::spawn(async move {
            hub.deliver_snapshot(id, snapshot_partition, queue, snapshot_closed).await;
        });

        Ok(Subscriber::new(id, partition, receiver, closed))
    }

    /// Removes a subscriber and closes its queue.
    ///
    /// Stops the partition watcher when the last subscriber leaves. Returns
    /// `false` if the subscriber was already removed.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let mut registry = self.registry.lock();
        self.remove_locked(&mut registry, id, Removal::Unsubscribed)
    }

    /// Delivers `message` to every current subscriber of `partition`.
    ///
    /// Subscribers whose queue is full are unsubscribed on the spot.
    pub fn broadcast(&self, partition: &str, message: OutboundMessage) {
        let message = Arc::new(message);
        let mut registry = self.registry.lock();
        registry.assert_consistent(partition);
        self.fan_out_locked(&mut registry, partition, &message);
    }

    /// Delivers `message` to every live subscriber of every partition.
    ///
    /// Used for heartbeats. Subscribers still receiving their initial snapshot
    /// are skipped.
    pub fn broadcast_all(&self, message: OutboundMessage) {
        let message = Arc::new(message);
        let mut registry = self.registry.lock();

        let mut evicted = Vec::new();
        for members in registry.subscribers.values() {
            for (id, member) in members {
                if let Delivery::Live = member.delivery {
                    if let Err(reason) = self.try_enqueue(id, member, &message) {
                        evicted.push((*id, reason));
                    }
                }
            }
        }

        for (id, reason) in evicted {
            self.remove_locked(&mut registry, &id, reason);
        }
    }

    /// Whether the subscriber has received its initial snapshot and now gets
    /// live events directly.
    pub fn is_live(&self, id: &SubscriberId) -> bool {
        let registry = self.registry.lock();
        registry
            .members
            .get(id)
            .and_then(|partition| registry.subscribers.get(partition))
            .and_then(|members| members.get(id))
            .is_some_and(|member| matches!(member.delivery, Delivery::Live))
    }

    /// Whether `partition` currently has subscribers.
    pub fn has_subscribers(&self, partition: &str) -> bool {
        self.registry.lock().subscribers.contains_key(partition)
    }

    /// Current registry counts.
    pub fn stats(&self) -> HubStats {
        let registry = self.registry.lock();
        HubStats {
            partitions: registry.subscribers.len(),
            subscribers: registry.members.len(),
            watchers: registry.watchers.len(),
        }
    }

    /// Shuts the hub down.
    ///
    /// New subscriptions are refused, every partition watcher is cancelled and
    /// then every subscriber queue is closed. Waits for the watcher tasks to
    /// finish. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut registry = self.registry.lock();
            if registry.shutting_down {
                return;
            }
            registry.shutting_down = true;
            self.shutdown.cancel();

            let mut tasks = Vec::with_capacity(registry.watchers.len());
            for (partition, watcher) in registry.watchers.drain() {
                debug!(partition = %partition, "Cancelling partition watcher");
                watcher.cancel.cancel();
                tasks.push(watcher.task);
            }

            for (_, members) in registry.subscribers.drain() {
                for (_, member) in members {
                    member.closed.cancel();
                }
            }
            registry.members.clear();

            self.metrics.active_watchers.set(0);
            self.metrics.subscribers.set(0);
            tasks
        };

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Partition watcher task failed during shutdown: {}", e);
            }
        }

        info!("Hub shutdown complete");
    }

    /// Publishes a message on behalf of a partition watcher.
    ///
    /// Returns `false` when `generation` is no longer the partition's current
    /// watcher, in which case the message is discarded.
    pub(crate) fn publish(&self, partition: &str, generation: u64, message: OutboundMessage) -> bool {
        let mut registry = self.registry.lock();
        let current = registry.watchers.get(partition).map(|w| w.generation);
        if current != Some(generation) {
            debug!(partition = %partition, generation, "Discarding message from stale watcher");
            return false;
        }

        let message = Arc::new(message);
        self.fan_out_locked(&mut registry, partition, &message);
        true
    }

    /// Whether `generation` is still the running watcher of a partition that
    /// has subscribers.
    pub(crate) fn is_current_watcher(&self, partition: &str, generation: u64) -> bool {
        let registry = self.registry.lock();
        registry.subscribers.contains_key(partition)
            && registry.watchers.get(partition).map(|w| w.generation) == Some(generation)
    }

    fn start_watcher_locked(self: &Arc<Self>, registry: &mut Registry, partition: &str) {
        registry.next_generation += 1;
        let generation = registry.next_generation;
        let cancel = self.shutdown.child_token();

        let watcher = PartitionWatcher::new(
            Arc::clone(self),
            partition.to_string(),
            generation,
            cancel.clone(),
            RetryBackoff::new(self.config.retry_delay, self.config.retry_max_delay),
        );
        let task = tokio::spawn(watcher.run());

        registry.watchers.insert(
            partition.to_string(),
            WatcherHandle {
                generation,
                cancel,
                task,
            },
        );
        self.metrics.active_watchers.inc();
        info!(partition = %partition, generation, "Started partition watcher");
    }

    fn fan_out_locked(&self, registry: &mut Registry, partition: &str, message: &Arc<OutboundMessage>) {
        let Some(members) = registry.subscribers.get_mut(partition) else {
            return;
        };

        let mut evicted = Vec::new();
        for (id, member) in members.iter_mut() {
            if let Delivery::Pending(held) = &mut member.delivery {
                if held.len() >= self.config.queue_capacity {
                    warn!(subscriber_id = %id, partition = %partition, "Backlog overflow during initial snapshot");
                    evicted.push((*id, Removal::SlowConsumer));
                } else {
                    held.push(Arc::clone(message));
                }
                continue;
            }

            if let Err(reason) = self.try_enqueue(id, member, message) {
                evicted.push((*id, reason));
            }
        }

        for (id, reason) in evicted {
            self.remove_locked(registry, &id, reason);
        }
    }

    fn try_enqueue(&self, id: &SubscriberId, member: &Member, message: &Arc<OutboundMessage>) -> Result<(), Removal> {
        match member.queue.try_send(Arc::clone(message)) {
            Ok(()) => {
                self.metrics.messages_delivered.inc();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber_id = %id, "Subscriber queue full");
                Err(Removal::SlowConsumer)
            }
            Err(TrySendError::Closed(_)) => Err(Removal::Disconnected),
        }
    }

    fn remove_locked(&self, registry: &mut Registry, id: &SubscriberId, reason: Removal) -> bool {
        let Some(partition) = registry.members.remove(id) else {
            return false;
        };

        let mut emptied = false;
        if let Some(members) = registry.subscribers.get_mut(&partition) {
            if let Some(member) = members.remove(id) {
                member.closed.cancel();
            }
            emptied = members.is_empty();
        }

        if emptied {
            registry.subscribers.remove(&partition);
            if let Some(watcher) = registry.watchers.remove(&partition) {
                watcher.cancel.cancel();
                self.metrics.active_watchers.dec();
                info!(partition = %partition, generation = watcher.generation, "Last subscriber left, stopping partition watcher");
            }
        }

        self.metrics.subscribers.dec();
        match reason {
            Removal::SlowConsumer => {
                self.metrics.forced_disconnects.inc();
                warn!(subscriber_id = %id, partition = %partition, "Slow subscriber disconnected");
            }
            Removal::Unsubscribed | Removal::Disconnected => {
                info!(subscriber_id = %id, partition = %partition, reason = ?reason, "Subscriber unregistered");
            }
        }
        true
    }

    async fn deliver_snapshot(
        self: Arc<Self>,
        id: SubscriberId,
        partition: String,
        queue: QueueSender,
        closed: CancellationToken,
    ) {
        let listed = tokio::select! {
            _ = closed.cancelled() => return,
            listed = self.snapshot_messages(&partition) => listed,
        };

        let messages = match listed {
            Ok(messages) => messages,
            Err(e) => {
                warn!(subscriber_id = %id, partition = %partition, "Failed to get initial state: {}", e);
                vec![OutboundMessage::error(&partition, format!("Initial state unavailable: {}", e))]
            }
        };

        let count = messages.len();
        for message in messages {
            tokio::select! {
                biased;
                _ = closed.cancelled() => return,
                sent = queue.send(Arc::new(message)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        drop(queue);

        debug!(subscriber_id = %id, partition = %partition, count, "Initial state delivered");
        self.go_live(&id);
    }

    async fn snapshot_messages(&self, partition: &str) -> Result<Vec<OutboundMessage>, HubError> {
        let resources = self.source.list(partition).await?;
        let mut messages = Vec::with_capacity(resources.len());
        for resource in &resources {
            let payload = serde_json::to_value(resource).map_err(crate::error::SourceError::from)?;
            messages.push(OutboundMessage::resource(MessageKind::ResourceAdded, partition, payload));
        }
        Ok(messages)
    }

    fn go_live(&self, id: &SubscriberId) {
        let mut registry = self.registry.lock();
        let Some(partition) = registry.members.get(id).cloned() else {
            return;
        };
        let Some(member) = registry.subscribers.get_mut(&partition).and_then(|m| m.get_mut(id)) else {
            return;
        };

        let held = match std::mem::replace(&mut member.delivery, Delivery::Live) {
            Delivery::Pending(held) => held,
            Delivery::Live => Vec::new(),
        };

        let mut failure = None;
        for message in &held {
            if let Err(reason) = self.try_enqueue(id, member, message) {
                failure = Some(reason);
                break;
            }
        }

        if let Some(reason) = failure {
            self.remove_locked(&mut registry, id, reason);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests fail loudly on unexpected errors")]
mod tests {
    use super::*;
    use crate::mock::{wait_until, MockWatchSource};
    use serde_json::json;

    async fn recv_within(subscriber: &mut Subscriber) -> Option<Arc<OutboundMessage>> {
        tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
            .await
            .expect("timed out waiting for message")
    }

    fn hub_with(source: &MockWatchSource, queue_capacity: usize) -> Arc<Hub<MockWatchSource>> {
        Hub::new(
            source.clone(),
            HubConfig {
                queue_capacity,
                ..HubConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_subscriber_starts_single_watcher() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let _a = hub.subscribe("default").unwrap();
        let _b = hub.subscribe("default").unwrap();

        wait_until(|| source.open_streams("default") == 1).await;
        assert_eq!(source.watch_calls("default"), 1);
        assert_eq!(
            hub.stats(),
            HubStats {
                partitions: 1,
                subscribers: 2,
                watchers: 1
            }
        );
    }

    #[tokio::test]
    async fn test_snapshot_precedes_live_events() {
        let source = MockWatchSource::new();
        source.set_resources("prod", vec![json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})]);
        let hub = hub_with(&source, 16);

        let mut subscriber = hub.subscribe("prod").unwrap();
        wait_until(|| source.open_streams("prod") == 1).await;
        assert!(source.emit_modified("prod", json!({"name": "a", "phase": "Running"})));

        let mut names = Vec::new();
        for _ in 0..3 {
            let msg = recv_within(&mut subscriber).await.unwrap();
            assert_eq!(msg.kind, MessageKind::ResourceAdded);
            names.push(msg.payload.as_ref().unwrap()["name"].as_str().unwrap().to_string());
        }
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);

        let live = recv_within(&mut subscriber).await.unwrap();
        assert_eq!(live.kind, MessageKind::ResourceUpdated);
        assert_eq!(live.partition.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn test_snapshot_failure_enqueues_error_and_keeps_subscription() {
        let source = MockWatchSource::new();
        source.fail_list(true);
        let hub = hub_with(&source, 16);

        let mut subscriber = hub.subscribe("prod").unwrap();
        let first = recv_within(&mut subscriber).await.unwrap();
        assert_eq!(first.kind, MessageKind::Error);

        wait_until(|| hub.is_live(&subscriber.id()) && source.open_streams("prod") == 1).await;
        assert!(source.emit_created("prod", json!({"name": "new"})));
        let live = recv_within(&mut subscriber).await.unwrap();
        assert_eq!(live.kind, MessageKind::ResourceAdded);
        assert_eq!(hub.stats().subscribers, 1);
    }

    #[tokio::test]
    async fn test_events_arrive_in_source_order() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 128);

        let mut subscriber = hub.subscribe("default").unwrap();
        wait_until(|| source.open_streams("default") == 1).await;

        for i in 0..50 {
            assert!(source.emit_modified("default", json!({"name": "pod", "seq": i})));
        }

        for i in 0..50 {
            let msg = recv_within(&mut subscriber).await.unwrap();
            assert_eq!(msg.payload.as_ref().unwrap()["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_starved_subscriber_is_evicted_without_blocking_others() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 4);

        let starved = hub.subscribe("default").unwrap();
        let mut healthy = hub.subscribe("default").unwrap();
        wait_until(|| {
            hub.is_live(&starved.id()) && hub.is_live(&healthy.id()) && source.open_streams("default") == 1
        })
        .await;

        for i in 0..10 {
            assert!(source.emit_modified("default", json!({"seq": i})));
            let msg = recv_within(&mut healthy).await.unwrap();
            assert_eq!(msg.payload.as_ref().unwrap()["seq"], i);
        }

        wait_until(|| starved.is_closed()).await;
        assert_eq!(hub.stats().subscribers, 1);
        assert_eq!(hub.metrics().forced_disconnects.get(), 1);
        assert!(!healthy.is_closed());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_stops_watcher_and_rejoin_starts_one() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let a = hub.subscribe("default").unwrap();
        let b = hub.subscribe("default").unwrap();
        wait_until(|| source.open_streams("default") == 1).await;

        assert!(hub.unsubscribe(&a.id()));
        assert_eq!(hub.stats().watchers, 1);

        assert!(hub.unsubscribe(&b.id()));
        assert_eq!(hub.stats().watchers, 0);
        wait_until(|| source.open_streams("default") == 0).await;

        let _c = hub.subscribe("default").unwrap();
        wait_until(|| source.open_streams("default") == 1).await;
        assert_eq!(source.watch_calls("default"), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let subscriber = hub.subscribe("default").unwrap();
        assert!(hub.unsubscribe(&subscriber.id()));
        assert!(!hub.unsubscribe(&subscriber.id()));

        assert_eq!(hub.stats().subscribers, 0);
        assert_eq!(hub.metrics().subscribers.get(), 0);
        assert!(subscriber.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_after_unsubscribe_is_noop() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let mut subscriber = hub.subscribe("default").unwrap();
        hub.unsubscribe(&subscriber.id());
        hub.broadcast("default", OutboundMessage::heartbeat());

        assert!(recv_within(&mut subscriber).await.is_none());
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let mut prod = hub.subscribe("prod").unwrap();
        let mut dev = hub.subscribe("dev").unwrap();
        wait_until(|| {
            hub.is_live(&prod.id())
                && hub.is_live(&dev.id())
                && source.open_streams("prod") == 1
                && source.open_streams("dev") == 1
        })
        .await;

        source.emit_created("prod", json!({"name": "p"}));
        source.emit_created("dev", json!({"name": "d"}));

        let p = recv_within(&mut prod).await.unwrap();
        let d = recv_within(&mut dev).await.unwrap();
        assert_eq!(p.payload.as_ref().unwrap()["name"], "p");
        assert_eq!(d.payload.as_ref().unwrap()["name"], "d");
    }

    #[tokio::test]
    async fn test_broadcast_all_reaches_every_partition() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let mut prod = hub.subscribe("prod").unwrap();
        let mut dev = hub.subscribe("dev").unwrap();
        wait_until(|| hub.is_live(&prod.id()) && hub.is_live(&dev.id())).await;

        hub.broadcast_all(OutboundMessage::heartbeat());

        assert_eq!(recv_within(&mut prod).await.unwrap().kind, MessageKind::Heartbeat);
        assert_eq!(recv_within(&mut dev).await.unwrap().kind, MessageKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let mut subscriber = hub.subscribe("default").unwrap();
        wait_until(|| hub.is_live(&subscriber.id())).await;

        assert!(!hub.publish("default", 999, OutboundMessage::heartbeat()));
        assert!(hub.publish("default", 1, OutboundMessage::heartbeat()));

        assert_eq!(recv_within(&mut subscriber).await.unwrap().kind, MessageKind::Heartbeat);
        let extra = tokio::time::timeout(Duration::from_millis(100), subscriber.recv()).await;
        assert!(extra.is_err(), "stale message must not be delivered");
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let mut a = hub.subscribe("prod").unwrap();
        let b = hub.subscribe("dev").unwrap();
        wait_until(|| source.open_streams("prod") == 1 && source.open_streams("dev") == 1).await;

        hub.shutdown().await;

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(recv_within(&mut a).await.is_none());
        assert_eq!(hub.stats(), HubStats { partitions: 0, subscribers: 0, watchers: 0 });
        wait_until(|| source.open_streams("prod") == 0 && source.open_streams("dev") == 0).await;
        assert!(matches!(hub.subscribe("prod"), Err(HubError::ShuttingDown)));

        // Second call is a no-op
        hub.shutdown().await;
    }

    #[tokio::test]
    #[should_panic(expected = "registry invariant violated")]
    async fn test_broadcast_panics_on_missing_watcher() {
        let source = MockWatchSource::new();
        let hub = hub_with(&source, 16);

        let _subscriber = hub.subscribe("default").unwrap();
        if let Some(watcher) = hub.registry.lock().watchers.remove("default") {
            watcher.cancel.cancel();
        }

        hub.broadcast("default", OutboundMessage::heartbeat());
    }
}

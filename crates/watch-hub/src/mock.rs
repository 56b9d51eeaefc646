//! Mock watch source for unit testing
//!
//! `MockWatchSource` keeps resources in memory for `list` and hands out watch
//! streams that test code feeds with [`emit`](MockWatchSource::emit) and ends
//! with [`end_stream`](MockWatchSource::end_stream). It also counts opened and
//! currently-open streams so watcher lifecycles can be asserted.

use crate::error::SourceError;
use crate::source::{SourceEvent, WatchSource, WatchStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<SourceEvent<Value>, SourceError>>;

#[derive(Debug, Default)]
struct MockState {
    resources: HashMap<String, Vec<Value>>,
    fail_list: bool,
    fail_watch: bool,
    // Feeds the most recently opened stream of each partition
    senders: HashMap<String, EventSender>,
    list_calls: HashMap<String, usize>,
    watch_calls: HashMap<String, usize>,
    open_streams: HashMap<String, usize>,
}

/// Mock watch source for testing
///
/// Clones share state, so a test can hand one clone to the hub and drive
/// the other.
#[derive(Debug, Clone, Default)]
pub struct MockWatchSource {
    state: Arc<Mutex<MockState>>,
}

/// Decrements the open-stream count when a watch stream is dropped.
struct OpenStreamGuard {
    state: Arc<Mutex<MockState>>,
    partition: String,
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(open) = state.open_streams.get_mut(&self.partition) {
            *open = open.saturating_sub(1);
        }
    }
}

impl MockWatchSource {
    /// Create a new mock source with no resources
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the resources returned by `list` for a partition
    pub fn set_resources(&self, partition: &str, resources: Vec<Value>) {
        self.state.lock().resources.insert(partition.to_string(), resources);
    }

    /// Make `list` fail for every partition
    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Make `watch` fail to open for every partition
    pub fn fail_watch(&self, fail: bool) {
        self.state.lock().fail_watch = fail;
    }

    /// Push an event onto the partition's current stream.
    ///
    /// Returns `false` if no stream is open for the partition.
    pub fn emit(&self, partition: &str, event: SourceEvent<Value>) -> bool {
        let state = self.state.lock();
        match state.senders.get(partition) {
            Some(sender) => sender.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Push a `Created` event onto the partition's current stream
    pub fn emit_created(&self, partition: &str, resource: Value) -> bool {
        self.emit(partition, SourceEvent::Created(resource))
    }

    /// Push a `Modified` event onto the partition's current stream
    pub fn emit_modified(&self, partition: &str, resource: Value) -> bool {
        self.emit(partition, SourceEvent::Modified(resource))
    }

    /// Push a `Deleted` event onto the partition's current stream
    pub fn emit_deleted(&self, partition: &str, resource: Value) -> bool {
        self.emit(partition, SourceEvent::Deleted(resource))
    }

    /// Push a stream error onto the partition's current stream
    pub fn emit_error(&self, partition: &str, message: &str) -> bool {
        let state = self.state.lock();
        match state.senders.get(partition) {
            Some(sender) => sender.send(Err(SourceError::Stream(message.to_string()))).is_ok(),
            None => false,
        }
    }

    /// End the partition's current stream as if the server closed it.
    ///
    /// Returns `false` if there was no stream to end.
    pub fn end_stream(&self, partition: &str) -> bool {
        self.state.lock().senders.remove(partition).is_some()
    }

    /// Number of `list` calls made for a partition
    pub fn list_calls(&self, partition: &str) -> usize {
        self.state.lock().list_calls.get(partition).copied().unwrap_or(0)
    }

    /// Number of `watch` calls made for a partition (including failed opens)
    pub fn watch_calls(&self, partition: &str) -> usize {
        self.state.lock().watch_calls.get(partition).copied().unwrap_or(0)
    }

    /// Number of streams for a partition that have been opened and not yet dropped
    pub fn open_streams(&self, partition: &str) -> usize {
        self.state.lock().open_streams.get(partition).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl WatchSource for MockWatchSource {
    type Resource = Value;

    async fn list(&self, partition: &str) -> Result<Vec<Value>, SourceError> {
        let mut state = self.state.lock();
        *state.list_calls.entry(partition.to_string()).or_default() += 1;

        if state.fail_list {
            return Err(SourceError::List {
                partition: partition.to_string(),
                message: "mock list failure".to_string(),
            });
        }
        Ok(state.resources.get(partition).cloned().unwrap_or_default())
    }

    async fn watch(&self, partition: &str) -> Result<WatchStream<Value>, SourceError> {
        let mut state = self.state.lock();
        *state.watch_calls.entry(partition.to_string()).or_default() += 1;

        if state.fail_watch {
            return Err(SourceError::Watch {
                partition: partition.to_string(),
                message: "mock watch failure".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.senders.insert(partition.to_string(), sender);
        *state.open_streams.entry(partition.to_string()).or_default() += 1;

        let guard = OpenStreamGuard {
            state: Arc::clone(&self.state),
            partition: partition.to_string(),
        };
        let stream = futures::stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
            receiver.recv().await.map(|item| (item, (receiver, guard)))
        });
        Ok(stream.boxed())
    }
}

/// Polls `condition` until it holds, panicking after five seconds of wall time.
///
/// Sleeps on the tokio clock between polls, so it also drives paused-clock tests.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

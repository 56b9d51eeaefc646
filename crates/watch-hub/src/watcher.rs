//! Partition watchers.
//!
//! A partition watcher keeps one watch stream open for its partition and
//! publishes every event through the hub, in arrival order. When the stream
//! breaks it is reopened after a backoff delay for as long as the partition has
//! subscribers. The delay grows only across consecutive failed opens; a stream
//! that opened successfully is followed by a reopen after the base delay. Cancellation (last subscriber gone, or hub shutdown) drops the
//! stream and ends the task; a cancelled watcher never restarts.

use crate::backoff::RetryBackoff;
use crate::hub::Hub;
use crate::message::OutboundMessage;
use crate::source::{SourceEvent, WatchSource};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum StreamEnd {
    /// Cancelled, or superseded by a newer watcher
    Stopped,
    /// Stream ended or failed without being asked to
    Broken,
}

/// Watches one partition for the lifetime of its subscriber set.
pub(crate) struct PartitionWatcher<S: WatchSource> {
    hub: Arc<Hub<S>>,
    partition: String,
    generation: u64,
    cancel: CancellationToken,
    backoff: RetryBackoff,
    restarts: u64,
}

impl<S: WatchSource> PartitionWatcher<S> {
    pub(crate) fn new(
        hub: Arc<Hub<S>>,
        partition: String,
        generation: u64,
        cancel: CancellationToken,
        backoff: RetryBackoff,
    ) -> Self {
        Self {
            hub,
            partition,
            generation,
            cancel,
            backoff,
            restarts: 0,
        }
    }

    /// Runs until cancelled or until the partition has no subscribers left.
    pub(crate) async fn run(mut self) {
        info!(partition = %self.partition, generation = self.generation, "Starting partition watch");

        loop {
            if let StreamEnd::Stopped = self.stream_once().await {
                break;
            }
            if !self.should_restart() {
                break;
            }

            let delay = self.backoff.next_delay();
            warn!(
                partition = %self.partition,
                attempt = self.backoff.attempts(),
                "Watch stream ended, restarting in {:?}",
                delay
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.should_restart() {
                break;
            }

            self.restarts += 1;
            self.hub.metrics().watch_restarts.inc();
        }

        info!(partition = %self.partition, restarts = self.restarts, "Stopped partition watch");
    }

    fn should_restart(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if !self.hub.is_current_watcher(&self.partition, self.generation) {
            info!(partition = %self.partition, "Partition has no subscribers, not restarting watch");
            return false;
        }
        true
    }

    /// Opens one watch stream and forwards its events until it ends.
    async fn stream_once(&mut self) -> StreamEnd {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return StreamEnd::Stopped,
            opened = self.hub.source().watch(&self.partition) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(partition = %self.partition, "Failed to open watch stream: {}", e);
                return StreamEnd::Broken;
            }
        };
        self.backoff.reset();
        debug!(partition = %self.partition, "Watch stream opened");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Stopped,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if !self.forward(event) {
                        return StreamEnd::Stopped;
                    }
                }
                Some(Err(e)) => {
                    warn!(partition = %self.partition, "Watch stream error: {}", e);
                    return StreamEnd::Broken;
                }
                None => return StreamEnd::Broken,
            }
        }
    }

    /// Translates one event and publishes it. Returns `false` once this
    /// watcher has been superseded.
    fn forward(&self, event: SourceEvent<S::Resource>) -> bool {
        let kind = event.message_kind();
        let payload = match serde_json::to_value(event.resource()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(partition = %self.partition, "Dropping event with unserializable payload: {}", e);
                return true;
            }
        };

        self.hub.publish(
            &self.partition,
            self.generation,
            OutboundMessage::resource(kind, &self.partition, payload),
        )
    }
}

//! Subscriber handles.
//!
//! A [`Subscriber`] is the consumer side of one connected client: the transport
//! layer's outbound loop drains it with [`Subscriber::recv`] while the hub keeps
//! the producer side in its registry. Removing the subscriber from the hub
//! drops the producer side, which closes the queue.

use crate::message::OutboundMessage;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque unique subscriber identity, generated at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Consumer handle for one subscriber's bounded outbound queue.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    partition: String,
    queue: mpsc::Receiver<Arc<OutboundMessage>>,
    closed: CancellationToken,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriberId,
        partition: String,
        queue: mpsc::Receiver<Arc<OutboundMessage>>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            partition,
            queue,
            closed,
        }
    }

    /// Identity used to unsubscribe.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Partition this subscriber receives messages for.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Waits for the next queued message.
    ///
    /// Returns `None` once the hub has removed the subscriber and every message
    /// enqueued before removal has been drained.
    pub async fn recv(&mut self) -> Option<Arc<OutboundMessage>> {
        self.queue.recv().await
    }

    /// Token cancelled when the hub removes this subscriber (unsubscribe,
    /// slow-consumer eviction or hub shutdown).
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the hub has already removed this subscriber.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

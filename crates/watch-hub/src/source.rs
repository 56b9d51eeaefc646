//! Resource watch source contract.
//!
//! A watch source lists the current resources of a partition and opens
//! long-lived change streams for it. The concrete implementation (e.g. the
//! Kubernetes pod source) lives outside this crate; tests use
//! [`MockWatchSource`](crate::mock::MockWatchSource).

use crate::error::SourceError;
use crate::message::MessageKind;
use futures::stream::BoxStream;
use serde::Serialize;

/// A change observed on a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent<R> {
    /// Resource added to the partition
    Created(R),
    /// Existing resource changed
    Modified(R),
    /// Resource removed; carries its last known state
    Deleted(R),
}

impl<R> SourceEvent<R> {
    /// Outbound message kind this event translates to.
    pub fn message_kind(&self) -> MessageKind {
        match self {
            SourceEvent::Created(_) => MessageKind::ResourceAdded,
            SourceEvent::Modified(_) => MessageKind::ResourceUpdated,
            SourceEvent::Deleted(_) => MessageKind::ResourceRemoved,
        }
    }

    /// The resource snapshot carried by the event.
    pub fn resource(&self) -> &R {
        match self {
            SourceEvent::Created(r) | SourceEvent::Modified(r) | SourceEvent::Deleted(r) => r,
        }
    }
}

/// Open change stream for one partition.
///
/// `None` means the stream ended. An `Err` item is a stream failure; the
/// consumer treats it like an unexpected end. Dropping the stream stops it and
/// unblocks any pending poll.
pub type WatchStream<R> = BoxStream<'static, Result<SourceEvent<R>, SourceError>>;

/// Trait for resource watch sources.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait WatchSource: Send + Sync + 'static {
    /// Resource snapshot type, serialized into outbound message payloads.
    type Resource: Serialize + Send + Sync + 'static;

    /// Lists the resources currently present in a partition.
    async fn list(&self, partition: &str) -> Result<Vec<Self::Resource>, SourceError>;

    /// Opens a change stream for a partition.
    async fn watch(&self, partition: &str) -> Result<WatchStream<Self::Resource>, SourceError>;
}

//! Outbound messages delivered from the hub to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A resource appeared (also used for every initial-state entry)
    ResourceAdded,
    /// A resource changed
    ResourceUpdated,
    /// A resource was deleted
    ResourceRemoved,
    /// Keepalive traffic, carries no partition or payload
    Heartbeat,
    /// Something went wrong for the partition; payload holds `{"message": ..}`
    Error,
}

/// The unit of data delivered to a subscriber.
///
/// Serializes to the wire record
/// `{kind, partition?, payload?, timestamp}` with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// What happened
    pub kind: MessageKind,
    /// Partition the message belongs to; absent for heartbeats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Serialized resource or error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Creation time of the message
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Resource change (or snapshot entry) for a partition.
    pub fn resource(kind: MessageKind, partition: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            partition: Some(partition.into()),
            payload: Some(payload),
            timestamp: Utc::now(),
        }
    }

    /// Global keepalive message.
    pub fn heartbeat() -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            partition: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    /// Error notice for a partition, e.g. a failed initial snapshot.
    pub fn error(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            partition: Some(partition.into()),
            payload: Some(serde_json::json!({ "message": message.into() })),
            timestamp: Utc::now(),
        }
    }

    /// Renders the wire record as JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

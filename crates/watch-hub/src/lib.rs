//! Watch Hub
//!
//! Real-time broadcast hub for cluster state. The hub watches one live resource
//! stream per partition (typically a Kubernetes namespace) and fans every change
//! out to the subscribers interested in that partition.
//!
//! # Example
//!
//! ```no_run
//! use watch_hub::{Hub, HubConfig, WatchSource};
//!
//! # async fn example<S: WatchSource>(source: S) -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Hub::new(source, HubConfig::default())?;
//!
//! // First subscriber for "default" starts the partition watcher
//! let mut subscriber = hub.subscribe("default")?;
//!
//! while let Some(message) = subscriber.recv().await {
//!     println!("{}", message.to_json()?);
//! }
//!
//! hub.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Lazy watchers**: one watch stream per partition, started by the first
//!   subscriber and stopped when the last one leaves
//! - **Initial snapshot**: late joiners receive the current state before live events
//! - **Slow consumer isolation**: a full subscriber queue disconnects that subscriber only
//! - **Restart with backoff**: broken watch streams are reopened while subscribers remain
//! - **Heartbeats**: periodic keepalive traffic for idle connections

pub mod backoff;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod source;
pub mod subscriber;
mod watcher;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use backoff::RetryBackoff;
pub use error::{HubError, SourceError};
pub use heartbeat::{MIN_HEARTBEAT_INTERVAL, spawn_heartbeat};
pub use hub::{Hub, HubConfig, HubStats};
pub use message::{MessageKind, OutboundMessage};
pub use metrics::HubMetrics;
pub use source::{SourceEvent, WatchSource, WatchStream};
pub use subscriber::{Subscriber, SubscriberId};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockWatchSource;

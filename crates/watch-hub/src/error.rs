//! Watch hub errors

use thiserror::Error;

/// Errors raised by a watch source implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Listing the current resources of a partition failed
    #[error("Failed to list resources in partition {partition}: {message}")]
    List {
        /// Partition that was being listed
        partition: String,
        /// Underlying failure
        message: String,
    },

    /// Opening a watch stream failed
    #[error("Failed to open watch stream for partition {partition}: {message}")]
    Watch {
        /// Partition whose stream failed to open
        partition: String,
        /// Underlying failure
        message: String,
    },

    /// An open watch stream reported an error
    #[error("Watch stream error: {0}")]
    Stream(String),

    /// Resource snapshot could not be serialized into a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the broadcast hub.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub is shutting down and no longer accepts subscribers
    #[error("Hub is shutting down")]
    ShuttingDown,

    /// Watch source error
    #[error("Watch source error: {0}")]
    Source(#[from] SourceError),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

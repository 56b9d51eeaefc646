//! Monitor-specific error types.
//!
//! Wraps the upstream library errors the pod monitor can hit during startup
//! and while serving.

use kube::Error as KubeError;
use thiserror::Error;
use watch_hub::HubError;

/// Errors that can occur in the pod monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Broadcast hub error
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file or listener I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML config file
    #[error("Config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

//! Kubernetes Pod Watch Source
//!
//! Implements the watch hub's [`WatchSource`](watch_hub::WatchSource) for
//! Kubernetes pods, using the namespace as the partition key. Pods are
//! translated into [`PodSnapshot`]s, a developer-friendly view of pod health.

pub mod pod;
pub mod source;

pub use pod::{ConditionSnapshot, ContainerSnapshot, ContainerState, PodSnapshot, PodState};
pub use source::PodWatchSource;

//! Pod snapshot model.
//!
//! Condenses a Kubernetes `Pod` into the fields a dashboard needs, with a
//! single status that distinguishes e.g. a pod that is scheduled-but-not-ready
//! from one that cannot be scheduled at all.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Developer-facing pod status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodState {
    /// Deletion requested, containers shutting down
    Terminating,
    /// Pending and not schedulable onto any node
    Scheduling,
    /// Scheduled, waiting for containers to be created
    Pending,
    /// Running and ready
    Running,
    /// Running but not yet ready
    Starting,
    /// All containers exited successfully
    Completed,
    /// At least one container exited with an error
    Failed,
    /// Phase missing or not recognized
    Unknown,
}

/// State of a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container process is running
    Running,
    /// Not started yet, or waiting to restart
    Waiting,
    /// Container process exited
    Terminated,
}

/// Status summary of one container in a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Container name
    pub name: String,
    /// Image the container runs
    pub image: String,
    /// Whether the container is reporting ready
    pub ready: bool,
    /// Restarts since the pod started
    pub restart_count: i32,
    /// Current state, if reported
    pub state: Option<ContainerState>,
    /// Reason for a waiting or terminated state (e.g. `CrashLoopBackOff`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable detail for a waiting or terminated state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One pod condition as reported by the kubelet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    /// Condition type, e.g. `Ready` or `PodScheduled`
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable detail for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the condition last changed status
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of a pod, used as the outbound message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    /// Pod name
    pub name: String,
    /// Namespace the pod lives in
    pub namespace: String,
    /// Developer-facing status derived from phase, conditions and deletion
    pub status: PodState,
    /// Raw Kubernetes phase
    pub phase: String,
    /// Whether the pod's `Ready` condition is `True`
    pub ready: bool,
    /// Restarts summed over all containers
    pub restarts: i32,
    /// Seconds since creation
    pub age_seconds: i64,
    /// Creation timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Pod labels
    pub labels: BTreeMap<String, String>,
    /// Node the pod is scheduled on
    pub node_name: Option<String>,
    /// Pod IP once assigned
    pub pod_ip: Option<String>,
    /// Per-container status
    pub containers: Vec<ContainerSnapshot>,
    /// Pod conditions
    pub conditions: Vec<ConditionSnapshot>,
}

impl PodSnapshot {
    /// Builds a snapshot with the pod age measured against the current time.
    pub fn from_pod(pod: &Pod) -> Self {
        Self::from_pod_at(pod, Utc::now())
    }

    /// Builds a snapshot with the pod age measured against `now`.
    pub fn from_pod_at(pod: &Pod, now: DateTime<Utc>) -> Self {
        let metadata = &pod.metadata;
        let status = pod.status.as_ref();

        let created_at = metadata.creation_timestamp.as_ref().and_then(to_utc);
        let age_seconds = created_at
            .map(|created| (now - created).num_seconds().max(0))
            .unwrap_or(0);

        let containers: Vec<ContainerSnapshot> = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(container_snapshot).collect())
            .unwrap_or_default();
        let restarts = containers.iter().map(|c| c.restart_count).sum();

        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| conditions.iter().map(condition_snapshot).collect())
            .unwrap_or_default();

        Self {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            status: pod_state(pod),
            phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
            ready: is_pod_ready(pod),
            restarts,
            age_seconds,
            created_at,
            labels: metadata.labels.clone().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            pod_ip: status.and_then(|s| s.pod_ip.clone()),
            containers,
            conditions,
        }
    }
}

/// Determines the developer-facing status of a pod.
pub fn pod_state(pod: &Pod) -> PodState {
    if pod.metadata.deletion_timestamp.is_some() {
        return PodState::Terminating;
    }

    let status = pod.status.as_ref();
    match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") => {
            let unschedulable = pod_conditions(pod)
                .iter()
                .any(|c| c.type_ == "PodScheduled" && c.status == "False");
            if unschedulable {
                PodState::Scheduling
            } else {
                PodState::Pending
            }
        }
        Some("Running") => {
            if is_pod_ready(pod) {
                PodState::Running
            } else {
                PodState::Starting
            }
        }
        Some("Succeeded") => PodState::Completed,
        Some("Failed") => PodState::Failed,
        _ => PodState::Unknown,
    }
}

/// Whether the pod's `Ready` condition is `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod_conditions(pod)
        .iter()
        .find(|c| c.type_ == "Ready")
        .is_some_and(|c| c.status == "True")
}

fn pod_conditions(pod: &Pod) -> &[PodCondition] {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
}

fn container_snapshot(status: &ContainerStatus) -> ContainerSnapshot {
    let mut snapshot = ContainerSnapshot {
        name: status.name.clone(),
        image: status.image.clone(),
        ready: status.ready,
        restart_count: status.restart_count,
        state: None,
        reason: None,
        message: None,
    };

    if let Some(state) = &status.state {
        if state.running.is_some() {
            snapshot.state = Some(ContainerState::Running);
        } else if let Some(waiting) = &state.waiting {
            snapshot.state = Some(ContainerState::Waiting);
            snapshot.reason = waiting.reason.clone();
            snapshot.message = waiting.message.clone();
        } else if let Some(terminated) = &state.terminated {
            snapshot.state = Some(ContainerState::Terminated);
            snapshot.reason = terminated.reason.clone();
            snapshot.message = terminated.message.clone();
        }
    }

    snapshot
}

fn condition_snapshot(condition: &PodCondition) -> ConditionSnapshot {
    ConditionSnapshot {
        type_: condition.type_.clone(),
        status: condition.status.clone(),
        reason: condition.reason.clone(),
        message: condition.message.clone(),
        last_transition_time: condition.last_transition_time.as_ref().and_then(to_utc),
    }
}

/// Converts a Kubernetes timestamp through its RFC 3339 wire form.
fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    value.as_str()?.parse().ok()
}

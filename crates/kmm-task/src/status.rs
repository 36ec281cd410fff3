//! Task kinds and the status projection of execution units

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use tracing::warn;

use kmm_common::{Error, Result, HASH_ANNOTATION};

/// The two task flavors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// In-cluster image build
    Build,
    /// Signing of module files in an existing image
    Sign,
}

impl TaskKind {
    /// Value of the job-type label
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Build => "build",
            TaskKind::Sign => "sign",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain status of a task returned from `sync`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// A new execution unit was just submitted
    Created,
    /// The unit is pending or running, or is being replaced
    InProgress,
    /// The unit finished successfully
    Completed,
    /// The unit failed
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::InProgress => "in progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Native pod phase, if reported
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Project a pod's phase onto [`TaskStatus`]
pub fn pod_status(pod: &Pod) -> Result<TaskStatus> {
    match pod_phase(pod) {
        Some("Succeeded") => Ok(TaskStatus::Completed),
        Some("Running") | Some("Pending") => Ok(TaskStatus::InProgress),
        Some("Failed") => Ok(TaskStatus::Failed),
        other => Err(Error::internal_with_context(
            "pod-status",
            format!(
                "unknown phase {:?} for pod {}",
                other,
                pod.metadata.name.as_deref().unwrap_or_default()
            ),
        )),
    }
}

/// Stored content hash of a pod
pub fn pod_hash(pod: &Pod) -> Option<&str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(HASH_ANNOTATION))
        .map(String::as_str)
}

/// Whether the live pod was rendered from a different template than `desired`.
///
/// A live pod without a hash cannot be compared and counts as changed.
pub fn is_pod_changed(existing: &Pod, desired: &Pod) -> bool {
    match (pod_hash(existing), pod_hash(desired)) {
        (Some(live), Some(wanted)) => live != wanted,
        (None, _) => {
            warn!(
                pod = existing.metadata.name.as_deref().unwrap_or_default(),
                "live pod carries no hash annotation"
            );
            true
        }
        (Some(_), None) => true,
    }
}

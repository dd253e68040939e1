//! Finite state machine for a deployment attempt

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deployment status as exposed to dashboards.
///
/// The serialized strings are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created by the API layer, waiting for a worker
    Queued,

    /// A worker owns the deployment
    InProgress,

    /// Published and verified
    Success,

    /// Rejected, failed at the provider, or failed verification
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// A worker picked the deployment up
    Start,

    /// Provider accepted the bundle and the live site passed its checks
    Succeed,

    /// Any failure, with the human-readable reason
    Fail(String),
}

/// Rejected transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition: {from} -> {event:?}")]
pub struct TransitionError {
    pub from: DeploymentStatus,
    pub event: DeploymentEvent,
}

/// Compute the next status for `event`.
///
/// `queued -> in_progress -> success | failed` is the only path; nothing skips
/// `in_progress` and nothing leaves a terminal state.
pub fn transition(
    from: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, TransitionError> {
    match (from, event) {
        (DeploymentStatus::Queued, DeploymentEvent::Start) => Ok(DeploymentStatus::InProgress),
        (DeploymentStatus::InProgress, DeploymentEvent::Succeed) => Ok(DeploymentStatus::Success),
        (DeploymentStatus::InProgress, DeploymentEvent::Fail(_)) => Ok(DeploymentStatus::Failed),
        (from, event) => Err(TransitionError {
            from,
            event: event.clone(),
        }),
    }
}

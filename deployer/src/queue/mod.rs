//! Job queue contract used by the deployment orchestrator

pub mod memory;
pub mod retry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryQueue, MemoryQueueOptions};
pub use retry::{retry_with, RetryError, RetryPolicy};

/// Payload of a deployment job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployJob {
    pub deployment_id: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

impl FromStr for BackoffKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" => Ok(BackoffKind::Exponential),
            "fixed" => Ok(BackoffKind::Fixed),
            other => Err(QueueError::InvalidArgument(format!(
                "unknown backoff type `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    pub delay_ms: u64,
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Per-job retry and scheduling options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub attempts: u32,
    pub backoff: Backoff,
    /// Lower runs first; unset counts as 0
    #[serde(default)]
    pub priority: Option<i32>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff {
                kind: BackoffKind::Exponential,
                delay_ms: 5000,
            },
            priority: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    /// Waiting out a backoff before the next attempt
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Delayed,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QueueError::InvalidArgument(format!("unknown job state `{}`", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
}

/// Snapshot of one job for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub data: DeployJob,
    pub options: JobOptions,
    pub state: JobState,
    pub attempts_made: u32,
    #[serde(default)]
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub waiting: usize,
}

/// Attempt metadata handed to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: String,
    /// 1-based
    pub attempt: u32,
    pub options: JobOptions,
}

/// A failed job attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
    /// Whether the queue should schedule another attempt
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Queue already has a handler")]
    AlreadyProcessing,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Broker operation {operation} failed: {message}")]
    Broker { operation: String, message: String },
}

/// Invoked once per job attempt
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &DeployJob, ctx: &JobContext) -> Result<(), JobFailure>;
}

/// At-least-once work queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: DeployJob, options: JobOptions) -> Result<JobHandle, QueueError>;

    /// Register the handler and start processing
    async fn process(&self, handler: Arc<dyn JobHandler>) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Jobs in any of `states` (all states when empty), oldest first
    async fn list_jobs(
        &self,
        states: &[JobState],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobInfo>, QueueError>;

    async fn get_job(&self, id: &str) -> Result<Option<JobInfo>, QueueError>;

    /// Stop starting new jobs. In-flight attempts run to completion.
    async fn pause(&self) -> Result<(), QueueError>;

    async fn resume(&self) -> Result<(), QueueError>;

    async fn is_paused(&self) -> Result<bool, QueueError>;

    /// Remove `state` jobs that finished more than `older_than` ago
    async fn clean(&self, older_than: Duration, state: JobState) -> Result<usize, QueueError>;
}

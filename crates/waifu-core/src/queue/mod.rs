//! Durable job queue for generation requests
//!
//! A job is an opaque id mapped to a prompt and a lifecycle state. The
//! [`JobStore`] trait covers the producer side (enqueue, status lookup)
//! and the worker side (claim plus state transitions). Production runs
//! against Redis ([`redis::RedisJobQueue`]); the in-memory store backs
//! tests and Redis-less local runs.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryJobQueue;
pub use self::redis::RedisJobQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a job
///
/// Transitions are monotonic: queued -> processing -> completed | failed.
/// `Unknown` is a lookup outcome for absent or expired jobs, never a
/// stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Unknown,
}

impl JobState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, JobState::Processing)
                | (Self::Processing, JobState::Completed)
                | (Self::Processing, JobState::Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            other => Err(QueueError::Corrupt(format!("bad job state: {other:?}"))),
        }
    }
}

/// A claimed unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

/// Snapshot returned by a status lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Generated text, present only when `state` is `completed`
    pub result: Option<String>,
}

impl JobStatus {
    /// Status for an absent or expired job
    pub fn unknown() -> Self {
        Self {
            state: JobState::Unknown,
            result: None,
        }
    }
}

/// Failures from the queue backing store
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Durable mapping from job ids to prompts, states, and results
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `queued` job and return its freshly generated id
    ///
    /// Never blocks on execution; the worker picks the job up later.
    async fn enqueue(&self, prompt: &str) -> Result<String, QueueError>;

    /// Look up a job's state and result
    ///
    /// Absent and expired jobs report [`JobStatus::unknown`] rather than
    /// an error.
    async fn status(&self, job_id: &str) -> Result<JobStatus, QueueError>;

    /// Atomically claim the oldest queued job, waiting up to `timeout`
    ///
    /// At most one caller ever receives a given job.
    async fn claim(&self, timeout: std::time::Duration) -> Result<Option<Job>, QueueError>;

    /// Transition a claimed job to `processing`
    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError>;

    /// Transition a job to `completed` and start its result TTL
    async fn mark_completed(&self, job_id: &str, result: &str) -> Result<(), QueueError>;

    /// Transition a job to `failed`, recording the failure detail
    async fn mark_failed(&self, job_id: &str, detail: &str) -> Result<(), QueueError>;
}

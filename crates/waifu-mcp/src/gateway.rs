//! Request gateway over the job queue
//!
//! Thin boundary between the MCP surface and the [`JobStore`]: input
//! validation and response shaping only. Submission never waits on
//! execution, and a missing job id surfaces as the `unknown` state rather
//! than an error.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use waifu_core::queue::{JobStatus, JobStore, QueueError};

/// Errors a submitting client can see
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("prompt must be non-empty text")]
    InvalidPrompt,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Response to a submitted prompt
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Response to a status lookup
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub result: Option<String>,
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        Self {
            status: status.state.to_string(),
            result: status.result,
        }
    }
}

/// Accepts prompts and answers status lookups
#[derive(Clone)]
pub struct RequestGateway {
    queue: Arc<dyn JobStore>,
}

impl RequestGateway {
    pub fn new(queue: Arc<dyn JobStore>) -> Self {
        Self { queue }
    }

    /// Enqueue a prompt and return the new job id
    pub async fn submit(&self, prompt: &str) -> Result<SubmitResponse, GatewayError> {
        if prompt.trim().is_empty() {
            return Err(GatewayError::InvalidPrompt);
        }
        let job_id = self.queue.enqueue(prompt).await?;
        info!(job_id = %job_id, "enqueued job");
        Ok(SubmitResponse { job_id })
    }

    /// Look up a job's state and result
    pub async fn status(&self, job_id: &str) -> Result<StatusResponse, GatewayError> {
        let status = self.queue.status(job_id).await?;
        info!(job_id = %job_id, status = %status.state, "job status lookup");
        Ok(status.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use waifu_core::queue::{JobState, MemoryJobQueue};

    fn gateway() -> (RequestGateway, Arc<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::default());
        (RequestGateway::new(queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_submit_returns_queued_job() {
        let (gateway, _queue) = gateway();
        let submitted = gateway.submit("Hello Waifu!").await.unwrap();
        let status = gateway.status(&submitted.job_id).await.unwrap();
        assert_eq!(status.status, "queued");
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let (gateway, _queue) = gateway();
        assert!(matches!(
            gateway.submit("").await.unwrap_err(),
            GatewayError::InvalidPrompt
        ));
        assert!(matches!(
            gateway.submit("   \n ").await.unwrap_err(),
            GatewayError::InvalidPrompt
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_is_a_state_not_an_error() {
        let (gateway, _queue) = gateway();
        let status = gateway.status("never-enqueued").await.unwrap();
        assert_eq!(status.status, "unknown");
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_completed_job_surfaces_result() {
        let (gateway, queue) = gateway();
        let submitted = gateway.submit("Hello Waifu!").await.unwrap();

        let job = queue
            .claim(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.mark_processing(&job.id).await.unwrap();
        queue.mark_completed(&job.id, "Hi there!").await.unwrap();

        let status = gateway.status(&submitted.job_id).await.unwrap();
        assert_eq!(status.status, "completed");
        assert_eq!(status.result.as_deref(), Some("Hi there!"));
    }

    #[tokio::test]
    async fn test_status_serialization_shape() {
        let response = StatusResponse {
            status: JobState::Failed.to_string(),
            result: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["result"], serde_json::Value::Null);
    }
}

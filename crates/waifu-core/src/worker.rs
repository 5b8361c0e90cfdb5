//! Worker loop draining the job queue
//!
//! Each executor runs a single claim-process-complete cycle at a time.
//! Multiple executors may run against the same queue; they coordinate
//! only through the queue's atomic claim. Provider failures mark the job
//! failed and the loop moves on; they are never fatal to the worker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::providers::router::ProviderRouter;
use crate::queue::{Job, JobStore};

const CLAIM_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_AFTER_QUEUE_ERROR: Duration = Duration::from_secs(1);

/// Long-lived worker that claims jobs and dispatches them to providers
pub struct JobExecutor {
    queue: Arc<dyn JobStore>,
    router: ProviderRouter,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(queue: Arc<dyn JobStore>, router: ProviderRouter, shutdown: CancellationToken) -> Self {
        Self {
            queue,
            router,
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(&self) {
        info!("job executor started");
        loop {
            let claimed = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                claimed = self.queue.claim(CLAIM_TIMEOUT) => claimed,
            };

            match claimed {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "failed to claim from queue, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(BACKOFF_AFTER_QUEUE_ERROR) => {}
                    }
                }
            }
        }
        info!("job executor stopped");
    }

    /// Process one claimed job through dispatch to a terminal state
    async fn process(&self, job: Job) {
        let job_id = job.id.clone();
        info!(job_id = %job_id, prompt_chars = job.prompt.len(), "processing job");

        if let Err(e) = self.queue.mark_processing(&job_id).await {
            // the record is gone or already moved on; nothing to execute
            warn!(job_id = %job_id, error = %e, "could not mark job processing, skipping");
            return;
        }

        match self.router.dispatch(&job.prompt, None).await {
            Ok(text) => {
                if let Err(e) = self.queue.mark_completed(&job_id, &text).await {
                    error!(job_id = %job_id, error = %e, "failed to persist job result");
                }
            }
            Err(dispatch_err) => {
                warn!(job_id = %job_id, error = %dispatch_err, "all providers failed for job");
                if let Err(e) = self
                    .queue
                    .mark_failed(&job_id, &dispatch_err.to_string())
                    .await
                {
                    error!(job_id = %job_id, error = %e, "failed to record job failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{ProviderError, ProviderKind, TextProvider};
    use crate::queue::{JobState, MemoryJobQueue};

    struct FixedProvider {
        kind: ProviderKind,
        outcome: Result<String, u16>,
    }

    #[async_trait::async_trait]
    impl TextProvider for FixedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            match &self.outcome {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(ProviderError::Http {
                    provider: self.kind,
                    status: *status,
                    body: "internal error".to_string(),
                }),
            }
        }
    }

    fn router(openrouter: Result<String, u16>, gemini: Result<String, u16>) -> ProviderRouter {
        ProviderRouter::new(
            ProviderKind::OpenRouter,
            Arc::new(FixedProvider {
                kind: ProviderKind::OpenRouter,
                outcome: openrouter,
            }),
            Arc::new(FixedProvider {
                kind: ProviderKind::Gemini,
                outcome: gemini,
            }),
        )
    }

    async fn run_one_job(
        queue: Arc<MemoryJobQueue>,
        router: ProviderRouter,
        prompt: &str,
    ) -> String {
        let job_id = queue.enqueue(prompt).await.unwrap();
        let executor = JobExecutor::new(queue.clone(), router, CancellationToken::new());
        let job = queue
            .claim(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        executor.process(job).await;
        job_id
    }

    #[tokio::test]
    async fn test_successful_job_completes_with_text() {
        let queue = Arc::new(MemoryJobQueue::default());
        let job_id = run_one_job(
            queue.clone(),
            router(Ok("Hi there!".to_string()), Ok("unused".to_string())),
            "Hello Waifu!",
        )
        .await;

        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.result.as_deref(), Some("Hi there!"));
    }

    #[tokio::test]
    async fn test_fallback_result_is_persisted() {
        let queue = Arc::new(MemoryJobQueue::default());
        let job_id = run_one_job(
            queue.clone(),
            router(Err(500), Ok("ok".to_string())),
            "prompt",
        )
        .await;

        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_total_failure_marks_job_failed() {
        let queue = Arc::new(MemoryJobQueue::default());
        let job_id = run_one_job(queue.clone(), router(Err(500), Err(500)), "prompt").await;

        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_run_loop_processes_jobs_until_shutdown() {
        let queue = Arc::new(MemoryJobQueue::default());
        let shutdown = CancellationToken::new();
        let executor = JobExecutor::new(
            queue.clone(),
            router(Ok("looped".to_string()), Ok("unused".to_string())),
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move { executor.run().await });

        let first = queue.enqueue("one").await.unwrap();
        let second = queue.enqueue("two").await.unwrap();

        // both jobs should reach completed without restarting the worker
        for job_id in [&first, &second] {
            let mut state = JobState::Queued;
            for _ in 0..50 {
                state = queue.status(job_id).await.unwrap().state;
                if state == JobState::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(state, JobState::Completed);
        }

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_survives_failed_job() {
        let queue = Arc::new(MemoryJobQueue::default());
        let shutdown = CancellationToken::new();
        let executor = JobExecutor::new(queue.clone(), router(Err(500), Err(503)), shutdown.clone());
        let handle = tokio::spawn(async move { executor.run().await });

        let failing = queue.enqueue("doomed").await.unwrap();
        let mut state = JobState::Queued;
        for _ in 0..50 {
            state = queue.status(&failing).await.unwrap().state;
            if state == JobState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, JobState::Failed);

        // loop is still alive and claims the next job
        let next = queue.enqueue("also doomed").await.unwrap();
        for _ in 0..50 {
            if queue.status(&next).await.unwrap().state == JobState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.status(&next).await.unwrap().state, JobState::Failed);

        shutdown.cancel();
        handle.await.unwrap();
    }
}

//! In-memory job queue
//!
//! Implements the same [`JobStore`] contract as the Redis queue over a
//! mutex-guarded map. Used by tests and for running the whole system
//! without a Redis instance. Unlike Redis, this implementation checks
//! state transitions explicitly and rejects non-monotonic ones.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use super::{Job, JobState, JobStatus, JobStore, QueueError};

#[derive(Debug, Clone)]
struct StoredJob {
    prompt: String,
    state: JobState,
    result: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Job queue held entirely in process memory
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    enqueued: Notify,
    result_ttl: Duration,
}

struct Inner {
    jobs: HashMap<String, StoredJob>,
    pending: VecDeque<String>,
}

impl MemoryJobQueue {
    /// Create an empty queue with the given result TTL
    pub fn new(result_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
            }),
            enqueued: Notify::new(),
            result_ttl,
        }
    }

    fn transition(
        &self,
        job_id: &str,
        to: JobState,
        update: impl FnOnce(&mut StoredJob),
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if !job.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.state,
                to,
            });
        }
        job.state = to;
        update(job);
        Ok(())
    }

    fn expired(&self, job: &StoredJob, now: DateTime<Utc>) -> bool {
        match job.finished_at {
            Some(finished_at) => now
                .signed_duration_since(finished_at)
                .to_std()
                .map(|elapsed| elapsed > self.result_ttl)
                .unwrap_or(false),
            None => false,
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl JobStore for MemoryJobQueue {
    async fn enqueue(&self, prompt: &str) -> Result<String, QueueError> {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            // sweep finished records past their TTL, so jobs nobody polls
            // again do not pile up for the life of the process
            inner.jobs.retain(|_, job| !self.expired(job, now));
            inner.jobs.insert(
                job_id.clone(),
                StoredJob {
                    prompt: prompt.to_string(),
                    state: JobState::Queued,
                    result: None,
                    error: None,
                    created_at: now,
                    finished_at: None,
                },
            );
            inner.pending.push_back(job_id.clone());
        }
        self.enqueued.notify_one();
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let Some(job) = inner.jobs.get(job_id) else {
            return Ok(JobStatus::unknown());
        };
        if self.expired(job, now) {
            // evict, matching Redis key expiry
            inner.jobs.remove(job_id);
            return Ok(JobStatus::unknown());
        }
        let job = &inner.jobs[job_id];
        let result = if job.state == JobState::Completed {
            job.result.clone()
        } else {
            None
        };
        Ok(JobStatus {
            state: job.state,
            result,
        })
    }

    async fn claim(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(job_id) = inner.pending.pop_front() {
                    if let Some(job) = inner.jobs.get(&job_id) {
                        return Ok(Some(Job {
                            id: job_id.clone(),
                            prompt: job.prompt.clone(),
                            created_at: job.created_at,
                        }));
                    }
                    // record evicted while queued; skip the orphan id
                    continue;
                }
            }
            if tokio::time::timeout_at(deadline, self.enqueued.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Processing, |_| {})
    }

    async fn mark_completed(&self, job_id: &str, result: &str) -> Result<(), QueueError> {
        let result = result.to_string();
        self.transition(job_id, JobState::Completed, move |job| {
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, job_id: &str, detail: &str) -> Result<(), QueueError> {
        let detail = detail.to_string();
        self.transition(job_id, JobState::Failed, move |job| {
            job.error = Some(detail);
            job.finished_at = Some(Utc::now());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryJobQueue {
        MemoryJobQueue::default()
    }

    #[tokio::test]
    async fn test_enqueue_reports_queued_with_no_result() {
        let queue = queue();
        let job_id = queue.enqueue("Hello Waifu!").await.unwrap();
        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_status_is_idempotent_before_transitions() {
        let queue = queue();
        let job_id = queue.enqueue("prompt").await.unwrap();
        let first = queue.status(&job_id).await.unwrap();
        let second = queue.status(&job_id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_for_missing_job() {
        let queue = queue();
        let status = queue.status("no-such-job").await.unwrap();
        assert_eq!(status.state, JobState::Unknown);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let queue = queue();
        let a = queue.enqueue("one").await.unwrap();
        let b = queue.enqueue("two").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_claim_returns_oldest_job() {
        let queue = queue();
        let first = queue.enqueue("first").await.unwrap();
        queue.enqueue("second").await.unwrap();
        let claimed = queue
            .claim(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.prompt, "first");
    }

    #[tokio::test]
    async fn test_claim_times_out_on_empty_queue() {
        let queue = queue();
        let claimed = queue.claim(Duration::from_millis(10)).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_claim_never_double_delivers() {
        let queue = queue();
        queue.enqueue("only").await.unwrap();
        let first = queue.claim(Duration::from_millis(10)).await.unwrap();
        let second = queue.claim(Duration::from_millis(10)).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_completed() {
        let queue = queue();
        let job_id = queue.enqueue("Hello Waifu!").await.unwrap();
        let job = queue
            .claim(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.mark_processing(&job.id).await.unwrap();
        assert_eq!(
            queue.status(&job_id).await.unwrap().state,
            JobState::Processing
        );

        queue.mark_completed(&job.id, "Hi there!").await.unwrap();
        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.result.as_deref(), Some("Hi there!"));
    }

    #[tokio::test]
    async fn test_failed_job_has_no_result() {
        let queue = queue();
        let job_id = queue.enqueue("prompt").await.unwrap();
        queue.mark_processing(&job_id).await.unwrap();
        queue
            .mark_failed(&job_id, "all providers failed")
            .await
            .unwrap();
        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_monotonic_transitions() {
        let queue = queue();
        let job_id = queue.enqueue("prompt").await.unwrap();

        // completing without processing first
        let err = queue.mark_completed(&job_id, "text").await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        queue.mark_processing(&job_id).await.unwrap();
        queue.mark_completed(&job_id, "text").await.unwrap();

        // no reverse transition out of completed
        let err = queue.mark_processing(&job_id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_completed_job_expires_to_unknown() {
        let queue = MemoryJobQueue::new(Duration::from_millis(20));
        let job_id = queue.enqueue("prompt").await.unwrap();
        queue.mark_processing(&job_id).await.unwrap();
        queue.mark_completed(&job_id, "short-lived").await.unwrap();

        assert_eq!(
            queue.status(&job_id).await.unwrap().state,
            JobState::Completed
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        let status = queue.status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Unknown);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_expired_jobs_are_swept_without_being_polled() {
        let queue = MemoryJobQueue::new(Duration::from_millis(20));
        let stale = queue.enqueue("forgotten").await.unwrap();
        queue.mark_processing(&stale).await.unwrap();
        queue.mark_completed(&stale, "never read").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        // a later enqueue drops the expired record even though no caller
        // ever asked for its status again
        queue.enqueue("fresh").await.unwrap();
        let inner = queue.inner.lock().unwrap();
        assert_eq!(inner.jobs.len(), 1);
        assert!(!inner.jobs.contains_key(&stale));
    }

    #[tokio::test]
    async fn test_claim_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(queue());
        let claimer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job_id = queue.enqueue("wake up").await.unwrap();
        let claimed = claimer.await.unwrap().unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
    }

    #[tokio::test]
    async fn test_mark_on_missing_job_is_not_found() {
        let queue = queue();
        let err = queue.mark_processing("ghost").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}

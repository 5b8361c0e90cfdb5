//! Redis-backed job queue
//!
//! Layout:
//! - `waifu:job:<id>` — hash holding prompt, state, created_at, and the
//!   result or failure detail once the job finishes
//! - `waifu:jobs:pending` — list of queued job ids (LPUSH to enqueue)
//! - `waifu:jobs:processing:<worker>` — ids claimed by one worker
//! - `waifu:jobs:workers` — set of worker ids that have claimed
//! - `waifu:worker:<worker>` — liveness key with a TTL, refreshed on
//!   every claim
//!
//! Claiming uses `BLMOVE pending processing:<worker> RIGHT LEFT`, so a
//! given id is handed to exactly one worker and stays visible on that
//! worker's processing list until the worker finishes it.
//! [`RedisJobQueue::recover_stale`] requeues ids only from processing
//! lists whose owner's liveness key has expired; a live worker's
//! in-flight jobs are never touched, so scaling out mid-flight cannot
//! re-deliver a claimed job.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Direction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Job, JobState, JobStatus, JobStore, QueueError};

const PENDING_LIST: &str = "waifu:jobs:pending";
const WORKERS_SET: &str = "waifu:jobs:workers";
const PROCESSING_KEY_PREFIX: &str = "waifu:jobs:processing:";
const WORKER_KEY_PREFIX: &str = "waifu:worker:";
const JOB_KEY_PREFIX: &str = "waifu:job:";

// Must outlive a worst-case job: the claim block plus both provider legs.
const WORKER_LIVENESS_TTL_SECS: u64 = 300;

fn job_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}")
}

fn processing_key(worker_id: &str) -> String {
    format!("{PROCESSING_KEY_PREFIX}{worker_id}")
}

fn worker_key(worker_id: &str) -> String {
    format!("{WORKER_KEY_PREFIX}{worker_id}")
}

/// What to do with an id found on a dead worker's processing list
#[derive(Debug, PartialEq, Eq)]
enum RecoverAction {
    /// Unfinished; return it to the pending list
    Requeue,
    /// Finished, or the record expired; just drop the id
    Drop,
}

fn recover_action(state: Option<&str>) -> RecoverAction {
    match state {
        Some("queued") | Some("processing") => RecoverAction::Requeue,
        _ => RecoverAction::Drop,
    }
}

/// Job queue over a Redis backing store
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    /// Separate connection for BLMOVE so a blocked claim never parks
    /// the pipeline that enqueue/status share
    claim_conn: MultiplexedConnection,
    result_ttl_seconds: i64,
    worker_id: String,
    processing_list: String,
}

impl RedisJobQueue {
    /// Connect to Redis at `url`
    ///
    /// `result_ttl_seconds` bounds how long finished job records live.
    /// Each instance gets its own worker identity; only instances that
    /// call [`JobStore::claim`] ever register it.
    pub async fn connect(url: &str, result_ttl_seconds: u64) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let claim_conn = client.get_multiplexed_async_connection().await?;
        let worker_id = Uuid::new_v4().to_string();
        let processing_list = processing_key(&worker_id);
        info!(url = url, worker_id = %worker_id, "connected to Redis job queue");
        Ok(Self {
            conn,
            claim_conn,
            result_ttl_seconds: result_ttl_seconds as i64,
            worker_id,
            processing_list,
        })
    }

    /// Requeue jobs stranded by dead workers
    ///
    /// Run once at worker startup, before claiming. Only processing
    /// lists whose owner's liveness key has expired are drained; a live
    /// worker keeps exclusive ownership of its claimed ids. Ids whose
    /// job record already finished (or expired) are dropped.
    pub async fn recover_stale(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let workers: Vec<String> = conn.smembers(WORKERS_SET).await?;
        let mut recovered = 0;

        for dead_worker in workers {
            if dead_worker == self.worker_id {
                continue;
            }
            let alive: bool = conn.exists(worker_key(&dead_worker)).await?;
            if alive {
                continue;
            }

            let list = processing_key(&dead_worker);
            let stranded: Vec<String> = conn.lrange(&list, 0, -1).await?;
            for job_id in stranded {
                let state: Option<String> = conn.hget(job_key(&job_id), "state").await?;
                match recover_action(state.as_deref()) {
                    RecoverAction::Requeue => {
                        redis::pipe()
                            .atomic()
                            .hset(job_key(&job_id), "state", JobState::Queued.to_string())
                            .ignore()
                            .lrem(&list, 0, &job_id)
                            .ignore()
                            .rpush(PENDING_LIST, &job_id)
                            .ignore()
                            .query_async::<()>(&mut conn)
                            .await?;
                        warn!(job_id = %job_id, worker_id = %dead_worker, "requeued stale in-flight job");
                        recovered += 1;
                    }
                    RecoverAction::Drop => {
                        let _: () = conn.lrem(&list, 0, &job_id).await?;
                    }
                }
            }

            redis::pipe()
                .atomic()
                .del(&list)
                .ignore()
                .srem(WORKERS_SET, &dead_worker)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }

        Ok(recovered)
    }

    async fn current_state(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &str,
    ) -> Result<JobState, QueueError> {
        let state: Option<String> = conn.hget(job_key(job_id), "state").await?;
        match state {
            Some(raw) => raw.parse(),
            None => Err(QueueError::NotFound(job_id.to_string())),
        }
    }

    /// Check the transition table before writing a state
    ///
    /// Claims are single-owner, so a plain read-then-write is enough
    /// here; the check catches callers that are out of step.
    async fn guard_transition(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &str,
        to: JobState,
    ) -> Result<(), QueueError> {
        let from = self.current_state(conn, job_id).await?;
        if !from.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    async fn finish(
        &self,
        job_id: &str,
        state: JobState,
        field: &str,
        value: &str,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.guard_transition(&mut conn, job_id, state).await?;
        redis::pipe()
            .atomic()
            .hset(job_key(job_id), "state", state.to_string())
            .ignore()
            .hset(job_key(job_id), field, value)
            .ignore()
            .expire(job_key(job_id), self.result_ttl_seconds)
            .ignore()
            .lrem(&self.processing_list, 0, job_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobQueue {
    async fn enqueue(&self, prompt: &str) -> Result<String, QueueError> {
        let job_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .hset_multiple(
                job_key(&job_id),
                &[
                    ("prompt", prompt),
                    ("state", "queued"),
                    ("created_at", created_at.as_str()),
                ],
            )
            .ignore()
            .lpush(PENDING_LIST, &job_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job_id, "enqueued job");
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(job_key(job_id)).await?;

        if fields.is_empty() {
            // never enqueued, or the record hit its TTL and was evicted
            return Ok(JobStatus::unknown());
        }

        let state: JobState = fields
            .get("state")
            .ok_or_else(|| QueueError::Corrupt(format!("job {job_id} has no state field")))?
            .parse()?;

        let result = if state == JobState::Completed {
            fields.get("result").cloned()
        } else {
            None
        };

        Ok(JobStatus { state, result })
    }

    async fn claim(&self, timeout: std::time::Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.claim_conn.clone();
        // 0.0 would block forever; keep the loop responsive to shutdown
        let timeout_secs = timeout.as_secs_f64().max(0.1);

        // advertise liveness before blocking, so recover_stale on other
        // workers leaves this worker's processing list alone
        redis::pipe()
            .atomic()
            .sadd(WORKERS_SET, &self.worker_id)
            .ignore()
            .set_ex(worker_key(&self.worker_id), "1", WORKER_LIVENESS_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        let claimed: Option<String> = conn
            .blmove(
                PENDING_LIST,
                &self.processing_list,
                Direction::Right,
                Direction::Left,
                timeout_secs,
            )
            .await?;

        let Some(job_id) = claimed else {
            return Ok(None);
        };

        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(job_key(&job_id)).await?;
        if fields.is_empty() {
            // record expired while the id sat in the pending list
            warn!(job_id = %job_id, "claimed id has no job record, dropping");
            let _: () = conn.lrem(&self.processing_list, 0, &job_id).await?;
            return Ok(None);
        }

        let prompt = fields
            .get("prompt")
            .ok_or_else(|| QueueError::Corrupt(format!("job {job_id} has no prompt field")))?
            .clone();
        let created_at = fields
            .get("created_at")
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        debug!(job_id = %job_id, "claimed job");
        Ok(Some(Job {
            id: job_id,
            prompt,
            created_at,
        }))
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.guard_transition(&mut conn, job_id, JobState::Processing)
            .await?;
        let _: () = conn
            .hset(job_key(job_id), "state", JobState::Processing.to_string())
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: &str, result: &str) -> Result<(), QueueError> {
        self.finish(job_id, JobState::Completed, "result", result)
            .await
    }

    async fn mark_failed(&self, job_id: &str, detail: &str) -> Result<(), QueueError> {
        self.finish(job_id, JobState::Failed, "error", detail).await
    }
}

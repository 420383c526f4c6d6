//! Redis-backed job broker.
//!
//! Jobs live as Redis hashes so scripts can mutate control fields (state,
//! attempts, progress) without re-encoding the caller's payload. Per-queue
//! indexes:
//!
//! - `{ns}:{queue}:waiting` — sorted set scored by `priority * 1e12 + seq`
//!   (lower priority value first, FIFO within a priority)
//! - `{ns}:{queue}:delayed` — sorted set scored by promote-at epoch millis
//! - `{ns}:{queue}:state:{state}` — one membership set per state
//! - `{ns}:{queue}:job:{id}` — the job hash
//! - `{ns}:{queue}:seq` — monotonic enqueue counter
//!
//! Claim, promotion, and cancellation run as Lua scripts; a job can only be
//! observed in one index at a time, and at most one worker ever pops a given
//! id from the waiting set.

use crate::config::QueueConfig;
use crate::queue::broker::{BrokerError, BrokerResult, JobBroker};
use crate::queue::job::{EnqueueOptions, Job, QueueStats, RetryPolicy, DEFAULT_PRIORITY};
use crate::queue::states::JobState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Atomically pop the best waiting job, mark it active, bump its attempt
/// counter, and move it to the active set.
const CLAIM_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
local id = popped[1]
local key = ARGV[1] .. id
if redis.call('EXISTS', key) == 0 then
    redis.call('SREM', KEYS[2], id)
    return false
end
redis.call('HSET', key, 'state', 'active', 'started_at', ARGV[2])
redis.call('HINCRBY', key, 'attempts', 1)
redis.call('SMOVE', KEYS[2], KEYS[3], id)
return redis.call('HGETALL', key)
"#;

/// Move delayed jobs whose deadline passed back into the waiting set with a
/// fresh FIFO sequence number.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[2], 'LIMIT', 0, 100)
local promoted = 0
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    local key = ARGV[1] .. id
    local priority = redis.call('HGET', key, 'priority')
    if priority then
        redis.call('HSET', key, 'state', 'waiting')
        local seq = redis.call('INCR', KEYS[4])
        redis.call('ZADD', KEYS[2], tonumber(priority) * 1e12 + seq, id)
        redis.call('SMOVE', KEYS[5], KEYS[3], id)
        promoted = promoted + 1
    end
end
return promoted
"#;

/// Cancel a waiting or delayed job; anything else is a no-op.
const CANCEL_SCRIPT: &str = r#"
local key = ARGV[1] .. ARGV[2]
local state = redis.call('HGET', key, 'state')
if state == 'waiting' then
    redis.call('ZREM', KEYS[1], ARGV[2])
    redis.call('SMOVE', KEYS[3], KEYS[5], ARGV[2])
elseif state == 'delayed' then
    redis.call('ZREM', KEYS[2], ARGV[2])
    redis.call('SMOVE', KEYS[4], KEYS[5], ARGV[2])
else
    return 0
end
redis.call('HSET', key, 'state', 'cancelled', 'finished_at', ARGV[3])
return 1
"#;

/// Redis job broker using multiplexed connection manager
pub struct RedisJobBroker {
    connection_manager: ConnectionManager,
    namespace: String,
    default_retry: RetryPolicy,
    claim_script: Script,
    promote_script: Script,
    cancel_script: Script,
}

impl std::fmt::Debug for RedisJobBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobBroker")
            .field("namespace", &self.namespace)
            .field("default_retry", &self.default_retry)
            .finish_non_exhaustive()
    }
}

impl RedisJobBroker {
    /// Connect and verify the backend with a PING
    pub async fn connect(url: &str, config: &QueueConfig) -> BrokerResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::ConnectionError(format!("Invalid Redis URL: {e}")))?;
        let mut connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut connection_manager)
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        info!(namespace = %config.namespace, "Redis job broker connected");
        Ok(Self {
            connection_manager,
            namespace: config.namespace.clone(),
            default_retry: RetryPolicy::from_config(config),
            claim_script: Script::new(CLAIM_SCRIPT),
            promote_script: Script::new(PROMOTE_SCRIPT),
            cancel_script: Script::new(CANCEL_SCRIPT),
        })
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.namespace, queue, suffix)
    }

    fn job_prefix(&self, queue: &str) -> String {
        format!("{}:{}:job:", self.namespace, queue)
    }

    fn state_key(&self, queue: &str, state: JobState) -> String {
        self.key(queue, &format!("state:{state}"))
    }

    fn waiting_score(priority: u32, seq: u64) -> f64 {
        priority as f64 * 1e12 + seq as f64
    }

    /// Flatten a job into hash fields; optional fields are simply absent
    fn job_to_fields(job: &Job) -> BrokerResult<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("id", job.id.clone()),
            ("job_type", job.job_type.clone()),
            ("payload", serde_json::to_string(&job.payload)?),
            ("state", job.state.to_string()),
            ("progress", job.progress.to_string()),
            ("attempts", job.attempts.to_string()),
            ("priority", job.priority.to_string()),
            ("retry", serde_json::to_string(&job.retry)?),
            ("created_at", job.created_at.to_rfc3339()),
        ];
        if let Some(result) = &job.result {
            fields.push(("result", serde_json::to_string(result)?));
        }
        if let Some(error) = &job.error {
            fields.push(("error", error.clone()));
        }
        if let Some(at) = job.started_at {
            fields.push(("started_at", at.to_rfc3339()));
        }
        if let Some(at) = job.finished_at {
            fields.push(("finished_at", at.to_rfc3339()));
        }
        Ok(fields)
    }

    fn job_from_map(map: HashMap<String, String>) -> BrokerResult<Job> {
        fn required<'a>(
            map: &'a HashMap<String, String>,
            field: &str,
        ) -> BrokerResult<&'a String> {
            map.get(field)
                .ok_or_else(|| BrokerError::Serialization(format!("missing job field {field}")))
        }

        fn parse_time(raw: &str) -> BrokerResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| BrokerError::Serialization(format!("bad timestamp {raw}: {e}")))
        }

        let state: JobState = required(&map, "state")?
            .parse()
            .map_err(BrokerError::Serialization)?;

        Ok(Job {
            id: required(&map, "id")?.clone(),
            job_type: required(&map, "job_type")?.clone(),
            payload: serde_json::from_str(required(&map, "payload")?)?,
            state,
            progress: required(&map, "progress")?
                .parse()
                .map_err(|e| BrokerError::Serialization(format!("bad progress: {e}")))?,
            attempts: required(&map, "attempts")?
                .parse()
                .map_err(|e| BrokerError::Serialization(format!("bad attempts: {e}")))?,
            priority: required(&map, "priority")?
                .parse()
                .map_err(|e| BrokerError::Serialization(format!("bad priority: {e}")))?,
            retry: serde_json::from_str(required(&map, "retry")?)?,
            result: map
                .get("result")
                .map(|raw| serde_json::from_str(raw))
                .transpose()?,
            error: map.get("error").cloned(),
            created_at: parse_time(required(&map, "created_at")?)?,
            started_at: map.get("started_at").map(|raw| parse_time(raw)).transpose()?,
            finished_at: map.get("finished_at").map(|raw| parse_time(raw)).transpose()?,
        })
    }

    async fn fetch_job(
        &self,
        conn: &mut ConnectionManager,
        queue: &str,
        job_id: &str,
    ) -> BrokerResult<Option<Job>> {
        let map: HashMap<String, String> =
            conn.hgetall(format!("{}{}", self.job_prefix(queue), job_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Self::job_from_map(map).map(Some)
    }
}

#[async_trait]
impl JobBroker for RedisJobBroker {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> BrokerResult<Job> {
        let mut conn = self.connection_manager.clone();

        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        let retry = options.retry.unwrap_or(self.default_retry);
        let mut job = Job::new(Uuid::new_v4().to_string(), job_type, payload, priority, retry);
        if options.delay.is_some() {
            job.state = JobState::Delayed;
        }

        let seq: u64 = conn.incr(self.key(queue, "seq"), 1).await?;
        let job_key = format!("{}{}", self.job_prefix(queue), job.id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(&job_key, &Self::job_to_fields(&job)?).ignore();
        match options.delay {
            Some(delay) => {
                let promote_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                pipe.zadd(self.key(queue, "delayed"), &job.id, promote_at).ignore();
                pipe.sadd(self.state_key(queue, JobState::Delayed), &job.id).ignore();
            }
            None => {
                pipe.zadd(
                    self.key(queue, "waiting"),
                    &job.id,
                    Self::waiting_score(priority, seq),
                )
                .ignore();
                pipe.sadd(self.state_key(queue, JobState::Waiting), &job.id).ignore();
            }
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(queue = queue, job_id = %job.id, job_type = job_type, "Job enqueued");
        Ok(job)
    }

    async fn claim_next(&self, queue: &str) -> BrokerResult<Option<Job>> {
        let mut conn = self.connection_manager.clone();

        let fields: Option<HashMap<String, String>> = self
            .claim_script
            .key(self.key(queue, "waiting"))
            .key(self.state_key(queue, JobState::Waiting))
            .key(self.state_key(queue, JobState::Active))
            .arg(self.job_prefix(queue))
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        match fields {
            Some(map) => Self::job_from_map(map).map(Some),
            None => Ok(None),
        }
    }

    async fn update_progress(&self, queue: &str, job_id: &str, progress: u8) -> BrokerResult<()> {
        let mut conn = self.connection_manager.clone();
        let job_key = format!("{}{}", self.job_prefix(queue), job_id);

        // Only the claiming worker mutates an active job, so a plain
        // read-clamp-write is race-free here
        let current: Option<(String, u8)> = {
            let state: Option<String> = conn.hget(&job_key, "state").await?;
            match state {
                Some(s) => {
                    let progress: u8 = conn.hget(&job_key, "progress").await.unwrap_or(0);
                    Some((s, progress))
                }
                None => None,
            }
        };

        if let Some((state, stored)) = current {
            if state == "active" {
                let clamped = stored.max(progress.min(100));
                conn.hset::<_, _, _, ()>(&job_key, "progress", clamped).await?;
            }
        }
        Ok(())
    }

    async fn complete(
        &self,
        queue: &str,
        job_id: &str,
        result: serde_json::Value,
    ) -> BrokerResult<()> {
        let mut conn = self.connection_manager.clone();
        let job_key = format!("{}{}", self.job_prefix(queue), job_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(
            &job_key,
            &[
                ("state", JobState::Completed.to_string()),
                ("progress", "100".to_string()),
                ("result", serde_json::to_string(&result)?),
                ("finished_at", Utc::now().to_rfc3339()),
            ],
        )
        .ignore();
        // Drop any stale field so a completed job never carries an error
        pipe.hdel(&job_key, "error").ignore();
        pipe.smove(
            self.state_key(queue, JobState::Active),
            self.state_key(queue, JobState::Completed),
            job_id,
        )
        .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        debug!(queue = queue, job_id = job_id, "Job completed");
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, error: &str) -> BrokerResult<JobState> {
        let mut conn = self.connection_manager.clone();
        let job_key = format!("{}{}", self.job_prefix(queue), job_id);

        let (attempts, retry_raw): (Option<u32>, Option<String>) = redis::pipe()
            .hget(&job_key, "attempts")
            .hget(&job_key, "retry")
            .query_async(&mut conn)
            .await?;
        let attempts =
            attempts.ok_or_else(|| BrokerError::BackendError(format!("unknown job {job_id}")))?;
        let retry: RetryPolicy = serde_json::from_str(
            &retry_raw
                .ok_or_else(|| BrokerError::Serialization("missing retry policy".to_string()))?,
        )?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if attempts < retry.max_attempts {
            let delay = retry.backoff_delay(attempts);
            let promote_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            // `error` is terminal-only; a retrying job stays error-free
            pipe.hset(&job_key, "state", JobState::Delayed.to_string()).ignore();
            pipe.zadd(self.key(queue, "delayed"), job_id, promote_at).ignore();
            pipe.smove(
                self.state_key(queue, JobState::Active),
                self.state_key(queue, JobState::Delayed),
                job_id,
            )
            .ignore();
            pipe.query_async::<()>(&mut conn).await?;

            debug!(
                queue = queue,
                job_id = job_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = error,
                "Job failed, retry scheduled"
            );
            Ok(JobState::Delayed)
        } else {
            pipe.hset_multiple(
                &job_key,
                &[
                    ("state", JobState::Failed.to_string()),
                    ("error", error.to_string()),
                    ("finished_at", Utc::now().to_rfc3339()),
                ],
            )
            .ignore();
            pipe.smove(
                self.state_key(queue, JobState::Active),
                self.state_key(queue, JobState::Failed),
                job_id,
            )
            .ignore();
            pipe.query_async::<()>(&mut conn).await?;

            debug!(queue = queue, job_id = job_id, attempts = attempts, "Job failed permanently");
            Ok(JobState::Failed)
        }
    }

    async fn cancel(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        let mut conn = self.connection_manager.clone();

        let cancelled: i64 = self
            .cancel_script
            .key(self.key(queue, "waiting"))
            .key(self.key(queue, "delayed"))
            .key(self.state_key(queue, JobState::Waiting))
            .key(self.state_key(queue, JobState::Delayed))
            .key(self.state_key(queue, JobState::Cancelled))
            .arg(self.job_prefix(queue))
            .arg(job_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if cancelled == 1 {
            debug!(queue = queue, job_id = job_id, "Job cancelled");
        }
        Ok(cancelled == 1)
    }

    async fn get_job(&self, queue: &str, job_id: &str) -> BrokerResult<Option<Job>> {
        let mut conn = self.connection_manager.clone();
        self.fetch_job(&mut conn, queue, job_id).await
    }

    async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> BrokerResult<Vec<Job>> {
        let mut conn = self.connection_manager.clone();

        let states: Vec<JobState> = match state {
            Some(s) => vec![s],
            None => vec![
                JobState::Waiting,
                JobState::Active,
                JobState::Completed,
                JobState::Failed,
                JobState::Delayed,
                JobState::Cancelled,
            ],
        };

        let mut jobs = Vec::new();
        for s in states {
            let ids: Vec<String> = conn.smembers(self.state_key(queue, s)).await?;
            for id in ids {
                if let Some(job) = self.fetch_job(&mut conn, queue, &id).await? {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        let mut conn = self.connection_manager.clone();

        let (waiting, active, completed, failed, delayed, cancelled): (
            u64,
            u64,
            u64,
            u64,
            u64,
            u64,
        ) = redis::pipe()
            .scard(self.state_key(queue, JobState::Waiting))
            .scard(self.state_key(queue, JobState::Active))
            .scard(self.state_key(queue, JobState::Completed))
            .scard(self.state_key(queue, JobState::Failed))
            .scard(self.state_key(queue, JobState::Delayed))
            .scard(self.state_key(queue, JobState::Cancelled))
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            queue: queue.to_string(),
            waiting,
            active,
            completed,
            failed,
            delayed,
            cancelled,
            total: waiting + active + completed + failed + delayed + cancelled,
        })
    }

    async fn promote_due(&self, queue: &str) -> BrokerResult<u64> {
        let mut conn = self.connection_manager.clone();

        let promoted: u64 = self
            .promote_script
            .key(self.key(queue, "delayed"))
            .key(self.key(queue, "waiting"))
            .key(self.state_key(queue, JobState::Waiting))
            .key(self.key(queue, "seq"))
            .key(self.state_key(queue, JobState::Delayed))
            .arg(self.job_prefix(queue))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            debug!(queue = queue, promoted = promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn prune(
        &self,
        queue: &str,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> BrokerResult<u64> {
        let mut conn = self.connection_manager.clone();
        let now = Utc::now();
        let mut removed = 0;

        let buckets = [
            (JobState::Completed, completed_retention),
            (JobState::Cancelled, completed_retention),
            (JobState::Failed, failed_retention),
        ];

        for (state, retention) in buckets {
            let set_key = self.state_key(queue, state);
            let ids: Vec<String> = conn.smembers(&set_key).await?;
            for id in ids {
                let job_key = format!("{}{}", self.job_prefix(queue), id);
                let finished: Option<String> = conn.hget(&job_key, "finished_at").await?;
                let expired = finished
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|at| {
                        now.signed_duration_since(at.with_timezone(&Utc))
                            .to_std()
                            .map(|age| age >= retention)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);

                if expired {
                    redis::pipe()
                        .atomic()
                        .del(&job_key)
                        .ignore()
                        .srem(&set_key, &id)
                        .ignore()
                        .query_async::<()>(&mut conn)
                        .await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

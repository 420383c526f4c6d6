//! In-process broker backed by a mutex-guarded map.
//!
//! Single-process deployments and the test suite use this backend. All state
//! transitions happen under one lock, which gives the same at-most-one-claim
//! guarantee the Redis backend gets from Lua scripts.

use crate::config::QueueConfig;
use crate::queue::broker::{BrokerError, BrokerResult, JobBroker};
use crate::queue::job::{EnqueueOptions, Job, QueueStats, RetryPolicy, DEFAULT_PRIORITY};
use crate::queue::states::JobState;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Per-queue indexes plus the job records themselves
#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    /// Claim order: (priority, seq, id) — lower priority value first, then FIFO
    waiting: BTreeSet<(u32, u64, String)>,
    /// Promotion order: (promote_at_ms, seq, id)
    delayed: BTreeSet<(i64, u64, String)>,
    /// Monotonic enqueue sequence, ties FIFO order within a priority
    seq: u64,
}

impl QueueState {
    fn remove_from_indexes(&mut self, job_id: &str) {
        self.waiting.retain(|(_, _, id)| id != job_id);
        self.delayed.retain(|(_, _, id)| id != job_id);
    }
}

/// In-memory job broker
#[derive(Debug)]
pub struct InMemoryJobBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    default_retry: RetryPolicy,
}

impl InMemoryJobBroker {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            default_retry: RetryPolicy::from_config(config),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl JobBroker for InMemoryJobBroker {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> BrokerResult<Job> {
        let mut queues = self.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();

        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        let retry = options.retry.unwrap_or(self.default_retry);
        let mut job = Job::new(Uuid::new_v4().to_string(), job_type, payload, priority, retry);

        state.seq += 1;
        let seq = state.seq;

        match options.delay {
            Some(delay) => {
                job.state = JobState::Delayed;
                let promote_at = Self::now_ms() + delay.as_millis() as i64;
                state.delayed.insert((promote_at, seq, job.id.clone()));
            }
            None => {
                state.waiting.insert((priority, seq, job.id.clone()));
            }
        }

        debug!(queue = queue, job_id = %job.id, job_type = job_type, "Job enqueued");
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn claim_next(&self, queue: &str) -> BrokerResult<Option<Job>> {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let Some(entry) = state.waiting.iter().next().cloned() else {
            return Ok(None);
        };
        state.waiting.remove(&entry);

        let (_, _, job_id) = entry;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| BrokerError::BackendError(format!("indexed job {job_id} missing")))?;

        job.state = JobState::Active;
        job.attempts += 1;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, queue: &str, job_id: &str, progress: u8) -> BrokerResult<()> {
        let mut queues = self.queues.lock();
        let job = queues
            .get_mut(queue)
            .and_then(|s| s.jobs.get_mut(job_id))
            .ok_or_else(|| BrokerError::BackendError(format!("unknown job {job_id}")))?;

        if job.state == JobState::Active {
            // Monotonic: plateaus allowed, decreases clamped
            job.progress = job.progress.max(progress.min(100));
        }
        Ok(())
    }

    async fn complete(
        &self,
        queue: &str,
        job_id: &str,
        result: serde_json::Value,
    ) -> BrokerResult<()> {
        let mut queues = self.queues.lock();
        let job = queues
            .get_mut(queue)
            .and_then(|s| s.jobs.get_mut(job_id))
            .ok_or_else(|| BrokerError::BackendError(format!("unknown job {job_id}")))?;

        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.error = None;
        job.finished_at = Some(Utc::now());
        debug!(queue = queue, job_id = job_id, "Job completed");
        Ok(())
    }

    async fn fail(&self, queue: &str, job_id: &str, error: &str) -> BrokerResult<JobState> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::BackendError(format!("unknown queue {queue}")))?;

        let seq = {
            state.seq += 1;
            state.seq
        };
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BrokerError::BackendError(format!("unknown job {job_id}")))?;

        if job.can_retry() {
            // The attempt error is logged, not stored: `error` is terminal-only
            // and a delayed job is still in flight
            let delay = job.retry.backoff_delay(job.attempts);
            job.state = JobState::Delayed;
            let promote_at = Self::now_ms() + delay.as_millis() as i64;
            let entry = (promote_at, seq, job.id.clone());
            debug!(
                queue = queue,
                job_id = job_id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = error,
                "Job failed, retry scheduled"
            );
            let landed = job.state;
            state.delayed.insert(entry);
            Ok(landed)
        } else {
            job.state = JobState::Failed;
            job.error = Some(error.to_string());
            job.finished_at = Some(Utc::now());
            debug!(
                queue = queue,
                job_id = job_id,
                attempts = job.attempts,
                "Job failed permanently"
            );
            Ok(JobState::Failed)
        }
    }

    async fn cancel(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(false);
        };
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(false);
        };

        if !job.state.is_cancellable() {
            return Ok(false);
        }

        job.state = JobState::Cancelled;
        job.finished_at = Some(Utc::now());
        state.remove_from_indexes(job_id);
        debug!(queue = queue, job_id = job_id, "Job cancelled");
        Ok(true)
    }

    async fn get_job(&self, queue: &str, job_id: &str) -> BrokerResult<Option<Job>> {
        let queues = self.queues.lock();
        Ok(queues
            .get(queue)
            .and_then(|s| s.jobs.get(job_id))
            .cloned())
    }

    async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> BrokerResult<Vec<Job>> {
        let queues = self.queues.lock();
        let Some(queue_state) = queues.get(queue) else {
            return Ok(Vec::new());
        };

        let mut jobs: Vec<Job> = queue_state
            .jobs
            .values()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        let queues = self.queues.lock();
        let mut stats = QueueStats {
            queue: queue.to_string(),
            ..QueueStats::default()
        };

        if let Some(state) = queues.get(queue) {
            for job in state.jobs.values() {
                match job.state {
                    JobState::Waiting => stats.waiting += 1,
                    JobState::Active => stats.active += 1,
                    JobState::Completed => stats.completed += 1,
                    JobState::Failed => stats.failed += 1,
                    JobState::Delayed => stats.delayed += 1,
                    JobState::Cancelled => stats.cancelled += 1,
                }
                stats.total += 1;
            }
        }
        Ok(stats)
    }

    async fn promote_due(&self, queue: &str) -> BrokerResult<u64> {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(0);
        };

        let now = Self::now_ms();
        let due: Vec<(i64, u64, String)> = state
            .delayed
            .iter()
            .take_while(|(at, _, _)| *at <= now)
            .cloned()
            .collect();

        let mut promoted = 0;
        for entry in due {
            state.delayed.remove(&entry);
            let (_, seq, job_id) = entry;
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.state = JobState::Waiting;
                state.waiting.insert((job.priority, seq, job_id));
                promoted += 1;
            }
        }

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
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(0);
        };

        let now = Utc::now();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            let retention = match job.state {
                JobState::Completed | JobState::Cancelled => completed_retention,
                JobState::Failed => failed_retention,
                _ => return true,
            };
            match job.finished_at {
                Some(finished) => {
                    let age = now.signed_duration_since(finished);
                    age.to_std().map(|a| a < retention).unwrap_or(true)
                }
                None => true,
            }
        });
        Ok((before - state.jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> InMemoryJobBroker {
        InMemoryJobBroker::new(&QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_assigns_id_and_waits() {
        let broker = broker();
        let job = broker
            .enqueue("ai-jobs", "coverage-analysis", json!({"x": 1}), &EnqueueOptions::default())
            .await
            .unwrap();

        assert!(!job.id.is_empty());
        assert_eq!(job.state, JobState::Waiting);

        let fetched = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
    }

    #[tokio::test]
    async fn test_claim_respects_priority_then_fifo() {
        let broker = broker();
        let low = broker
            .enqueue(
                "ai-jobs",
                "a",
                json!({}),
                &EnqueueOptions { priority: Some(20), ..Default::default() },
            )
            .await
            .unwrap();
        let first_high = broker
            .enqueue(
                "ai-jobs",
                "b",
                json!({}),
                &EnqueueOptions { priority: Some(5), ..Default::default() },
            )
            .await
            .unwrap();
        let second_high = broker
            .enqueue(
                "ai-jobs",
                "c",
                json!({}),
                &EnqueueOptions { priority: Some(5), ..Default::default() },
            )
            .await
            .unwrap();

        let order: Vec<String> = [
            broker.claim_next("ai-jobs").await.unwrap().unwrap().id,
            broker.claim_next("ai-jobs").await.unwrap().unwrap().id,
            broker.claim_next("ai-jobs").await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec![first_high.id, second_high.id, low.id]);
        assert!(broker.claim_next("ai-jobs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_active_and_counts_attempt() {
        let broker = broker();
        broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();

        let claimed = broker.claim_next("ai-jobs").await.unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_requeues_until_attempts_exhausted() {
        let broker = broker();
        let job = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();

        // Default policy allows 3 attempts
        for attempt in 1..=3 {
            broker.promote_due("ai-jobs").await.unwrap();
            // First attempt claims directly; retries need their delay to pass,
            // so force-promote by manipulating time via a zero-delay policy is
            // not available here — instead verify the landed state.
            if attempt == 1 {
                let claimed = broker.claim_next("ai-jobs").await.unwrap().unwrap();
                assert_eq!(claimed.attempts, attempt);
            }
            let landed = broker.fail("ai-jobs", &job.id, "provider timeout").await.unwrap();
            if attempt < 3 {
                assert_eq!(landed, JobState::Delayed);
                // Simulate the worker claiming after promotion
                let stored = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
                assert_eq!(stored.state, JobState::Delayed);
                // Re-activate manually for the next failure round
                let mut queues = broker.queues.lock();
                let state = queues.get_mut("ai-jobs").unwrap();
                state.remove_from_indexes(&job.id);
                let j = state.jobs.get_mut(&job.id).unwrap();
                j.state = JobState::Active;
                j.attempts += 1;
            }
        }

        let stored = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.error.as_deref(), Some("provider timeout"));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_then_success_leaves_no_error() {
        let broker = broker();
        // Zero backoff so promote_due picks the retry up immediately
        let options = EnqueueOptions {
            retry: Some(RetryPolicy { max_attempts: 3, base_delay_ms: 0, cap_delay_ms: 0 }),
            ..Default::default()
        };
        let job = broker
            .enqueue("ai-jobs", "t", json!({}), &options)
            .await
            .unwrap();

        broker.claim_next("ai-jobs").await.unwrap().unwrap();
        let landed = broker.fail("ai-jobs", &job.id, "transient").await.unwrap();
        assert_eq!(landed, JobState::Delayed);

        // The retryable job is still in flight, so pollers see no error
        let delayed = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert!(delayed.error.is_none());

        broker.promote_due("ai-jobs").await.unwrap();
        broker.claim_next("ai-jobs").await.unwrap().unwrap();
        broker.complete("ai-jobs", &job.id, json!({"ok": true})).await.unwrap();

        // Terminal success carries a result and nothing else
        let done = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result, Some(json!({"ok": true})));
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_only_before_execution() {
        let broker = broker();
        let waiting = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        assert!(broker.cancel("ai-jobs", &waiting.id).await.unwrap());
        let stored = broker.get_job("ai-jobs", &waiting.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Cancelled);

        // A cancelled job never gets claimed
        assert!(broker.claim_next("ai-jobs").await.unwrap().is_none());

        let active = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        broker.claim_next("ai-jobs").await.unwrap().unwrap();
        assert!(!broker.cancel("ai-jobs", &active.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_enqueue_promotes_after_deadline() {
        let broker = broker();
        let job = broker
            .enqueue(
                "ai-jobs",
                "t",
                json!({}),
                &EnqueueOptions { delay: Some(Duration::from_millis(0)), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert!(broker.claim_next("ai-jobs").await.unwrap().is_none());

        let promoted = broker.promote_due("ai-jobs").await.unwrap();
        assert_eq!(promoted, 1);
        let claimed = broker.claim_next("ai-jobs").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let broker = broker();
        let job = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        broker.claim_next("ai-jobs").await.unwrap();

        broker.update_progress("ai-jobs", &job.id, 40).await.unwrap();
        broker.update_progress("ai-jobs", &job.id, 25).await.unwrap();
        broker.update_progress("ai-jobs", &job.id, 40).await.unwrap();

        let stored = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 40);
    }

    #[tokio::test]
    async fn test_complete_forces_full_progress() {
        let broker = broker();
        let job = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        broker.claim_next("ai-jobs").await.unwrap();
        broker.update_progress("ai-jobs", &job.id, 60).await.unwrap();
        broker
            .complete("ai-jobs", &job.id, json!({"lines": 120}))
            .await
            .unwrap();

        let stored = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.result, Some(json!({"lines": 120})));
    }

    #[tokio::test]
    async fn test_stats_count_every_state() {
        let broker = broker();
        broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        let active = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        broker.claim_next("ai-jobs").await.unwrap();
        // claim_next took the first enqueued job, not necessarily `active`,
        // but counts are state-based so identity does not matter here
        let _ = active;

        let stats = broker.queue_stats("ai-jobs").await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn test_prune_drops_old_terminal_jobs() {
        let broker = broker();
        let job = broker
            .enqueue("ai-jobs", "t", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        broker.claim_next("ai-jobs").await.unwrap();
        broker.complete("ai-jobs", &job.id, json!({})).await.unwrap();

        // Zero retention removes it immediately
        let removed = broker
            .prune("ai-jobs", Duration::from_secs(0), Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(broker.get_job("ai-jobs", &job.id).await.unwrap().is_none());
    }
}

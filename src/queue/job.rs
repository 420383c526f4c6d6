//! Job data model, enqueue options, retry policy, and derived queue stats.

use super::states::JobState;
use crate::config::QueueConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy with exponential backoff
///
/// Attempt `n` is delayed by `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            cap_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.backoff_base_ms,
            cap_delay_ms: config.backoff_cap_ms,
        }
    }

    /// Backoff before re-running after the given (1-based) failed attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.cap_delay_ms))
    }
}

/// Options accepted at enqueue time
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Lower numeric value is served first; defaults to 10
    pub priority: Option<u32>,
    /// Override the queue's default retry policy
    pub retry: Option<RetryPolicy>,
    /// Hold the job in `delayed` until this much time has passed
    pub delay: Option<Duration>,
}

/// Default priority when the caller does not specify one
pub const DEFAULT_PRIORITY: u32 = 10;

/// A unit of work held in a named queue
///
/// Created by the dispatcher on behalf of a caller, exclusively mutated by
/// whichever worker currently holds the claim, and read by any number of
/// status-polling callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Broker-assigned unique identifier
    pub id: String,
    /// One of a small closed set of domain operations
    pub job_type: String,
    /// Input data, auth token reference, target model identifier
    pub payload: serde_json::Value,
    pub state: JobState,
    /// 0-100, monotonically non-decreasing while active
    pub progress: u8,
    /// Execution attempts so far
    pub attempts: u32,
    pub priority: u32,
    pub retry: RetryPolicy,
    /// Populated only in the `completed` terminal state
    pub result: Option<serde_json::Value>,
    /// Populated only in the `failed` terminal state
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh job in the `waiting` state
    pub fn new(
        id: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            payload,
            state: JobState::Waiting,
            progress: 0,
            attempts: 0,
            priority,
            retry,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether another execution attempt is allowed after a failure
    pub fn can_retry(&self) -> bool {
        self.attempts < self.retry.max_attempts
    }
}

/// Per-queue job counts, recomputed on demand (never persisted)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queue: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub cancelled: u64,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1000,
            cap_delay_ms: 60_000,
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        // Cap kicks in well before overflow territory
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(60_000));
        assert_eq!(policy.backoff_delay(64), Duration::from_millis(60_000));
    }

    #[test]
    fn test_default_policy_matches_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
    }

    #[test]
    fn test_new_job_starts_waiting() {
        let job = Job::new(
            "job-1",
            "batch-generate-tests",
            serde_json::json!({"tasks": []}),
            DEFAULT_PRIORITY,
            RetryPolicy::default(),
        );

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempts, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.can_retry());
    }

    #[test]
    fn test_retry_exhaustion() {
        let mut job = Job::new(
            "job-1",
            "coverage-analysis",
            serde_json::json!({}),
            DEFAULT_PRIORITY,
            RetryPolicy::default(),
        );
        job.attempts = 3;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_job_round_trips_through_json() {
        let job = Job::new(
            "job-42",
            "complex-risk-analysis",
            serde_json::json!({"features": ["login"]}),
            5,
            RetryPolicy::default(),
        );

        let raw = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, job);
    }
}

//! Broker abstraction: durable persistence and atomic claim semantics.
//!
//! The broker provides atomic enqueue, atomic claim, status/progress
//! persistence, and listing by state. Claiming is atomic at the backend
//! (Lua script on Redis, a single mutex in memory) — at most one worker may
//! hold an `active` job system-wide; application code never relies on its
//! own flags for this.

use super::brokers::{InMemoryJobBroker, RedisJobBroker};
use super::job::{EnqueueOptions, Job, QueueStats};
use super::states::JobState;
use crate::config::QueueConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur in broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Backend connection failure
    #[error("Broker connection error: {0}")]
    ConnectionError(String),

    /// Job payload could not be encoded/decoded
    #[error("Broker serialization error: {0}")]
    Serialization(String),

    /// Generic backend error
    #[error("Broker backend error: {0}")]
    BackendError(String),

    /// No durable broker is configured (synchronous passthrough mode)
    #[error("No durable broker configured")]
    NotConfigured,
}

impl From<serde_json::Error> for BrokerError {
    fn from(error: serde_json::Error) -> Self {
        BrokerError::Serialization(error.to_string())
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error() {
            BrokerError::ConnectionError(error.to_string())
        } else {
            BrokerError::BackendError(error.to_string())
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Durable job broker interface
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Persist a new job; the broker assigns the id and initial state
    /// (`waiting`, or `delayed` when the options carry a delay)
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> BrokerResult<Job>;

    /// Atomically claim the next eligible waiting job (priority, then FIFO)
    /// and transition it to `active`. Returns `None` when the queue is empty.
    async fn claim_next(&self, queue: &str) -> BrokerResult<Option<Job>>;

    /// Record progress for an active job; plateaus are allowed, decreases
    /// are clamped so progress stays monotonic
    async fn update_progress(&self, queue: &str, job_id: &str, progress: u8) -> BrokerResult<()>;

    /// Transition an active job to `completed` with its result (progress
    /// forced to 100)
    async fn complete(
        &self,
        queue: &str,
        job_id: &str,
        result: serde_json::Value,
    ) -> BrokerResult<()>;

    /// Record a failed attempt: re-queue as `delayed` with backoff while
    /// attempts remain, otherwise terminal `failed` with the stored error.
    /// Returns the state the job landed in.
    async fn fail(&self, queue: &str, job_id: &str, error: &str) -> BrokerResult<JobState>;

    /// Cancel a `waiting` or `delayed` job, marking it `cancelled`.
    /// Returns `false` (no-op) for active, terminal, or unknown jobs.
    async fn cancel(&self, queue: &str, job_id: &str) -> BrokerResult<bool>;

    /// Fetch a job snapshot by id
    async fn get_job(&self, queue: &str, job_id: &str) -> BrokerResult<Option<Job>>;

    /// List up to `limit` jobs, optionally filtered by state. Slices are
    /// per-state buckets; no global ordering across mixed buckets.
    async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> BrokerResult<Vec<Job>>;

    /// Counts per state plus total
    async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats>;

    /// Move delayed jobs whose delay has elapsed back to `waiting`;
    /// returns how many were promoted
    async fn promote_due(&self, queue: &str) -> BrokerResult<u64>;

    /// Drop terminal jobs past their retention window; returns how many
    /// were removed
    async fn prune(
        &self,
        queue: &str,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> BrokerResult<u64>;
}

/// Broker provider with enum dispatch and graceful construction
///
/// `None` is a first-class mode: the queue component degrades to
/// synchronous passthrough and callers execute operations inline.
#[derive(Debug)]
pub enum BrokerProvider {
    Redis(RedisJobBroker),
    InMemory(InMemoryJobBroker),
    None,
}

impl BrokerProvider {
    /// Connect to the configured backend, degrading to passthrough when no
    /// URL is configured or the connection fails
    pub async fn from_config(redis_url: Option<&str>, config: &QueueConfig) -> Self {
        let Some(url) = redis_url else {
            info!("No Redis URL configured, queue degrades to synchronous passthrough");
            return Self::None;
        };

        match RedisJobBroker::connect(url, config).await {
            Ok(broker) => {
                info!(backend = "redis", "Job broker initialized");
                Self::Redis(broker)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis broker, degrading to synchronous passthrough"
                );
                Self::None
            }
        }
    }

    /// In-process broker for single-process deployments and tests
    pub fn in_memory(config: &QueueConfig) -> Self {
        Self::InMemory(InMemoryJobBroker::new(config))
    }

    /// Whether a durable (or in-process) backend is available
    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::InMemory(_) => "in-memory",
            Self::None => "none",
        }
    }
}

#[async_trait]
impl JobBroker for BrokerProvider {
    async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> BrokerResult<Job> {
        match self {
            Self::Redis(b) => b.enqueue(queue, job_type, payload, options).await,
            Self::InMemory(b) => b.enqueue(queue, job_type, payload, options).await,
            Self::None => Err(BrokerError::NotConfigured),
        }
    }

    async fn claim_next(&self, queue: &str) -> BrokerResult<Option<Job>> {
        match self {
            Self::Redis(b) => b.claim_next(queue).await,
            Self::InMemory(b) => b.claim_next(queue).await,
            Self::None => Ok(None),
        }
    }

    async fn update_progress(&self, queue: &str, job_id: &str, progress: u8) -> BrokerResult<()> {
        match self {
            Self::Redis(b) => b.update_progress(queue, job_id, progress).await,
            Self::InMemory(b) => b.update_progress(queue, job_id, progress).await,
            // Inline execution has nowhere to record progress
            Self::None => Ok(()),
        }
    }

    async fn complete(
        &self,
        queue: &str,
        job_id: &str,
        result: serde_json::Value,
    ) -> BrokerResult<()> {
        match self {
            Self::Redis(b) => b.complete(queue, job_id, result).await,
            Self::InMemory(b) => b.complete(queue, job_id, result).await,
            Self::None => Err(BrokerError::NotConfigured),
        }
    }

    async fn fail(&self, queue: &str, job_id: &str, error: &str) -> BrokerResult<JobState> {
        match self {
            Self::Redis(b) => b.fail(queue, job_id, error).await,
            Self::InMemory(b) => b.fail(queue, job_id, error).await,
            Self::None => Err(BrokerError::NotConfigured),
        }
    }

    async fn cancel(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        match self {
            Self::Redis(b) => b.cancel(queue, job_id).await,
            Self::InMemory(b) => b.cancel(queue, job_id).await,
            Self::None => Ok(false),
        }
    }

    async fn get_job(&self, queue: &str, job_id: &str) -> BrokerResult<Option<Job>> {
        match self {
            Self::Redis(b) => b.get_job(queue, job_id).await,
            Self::InMemory(b) => b.get_job(queue, job_id).await,
            Self::None => Ok(None),
        }
    }

    async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> BrokerResult<Vec<Job>> {
        match self {
            Self::Redis(b) => b.list_jobs(queue, state, limit).await,
            Self::InMemory(b) => b.list_jobs(queue, state, limit).await,
            Self::None => Ok(Vec::new()),
        }
    }

    async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        match self {
            Self::Redis(b) => b.queue_stats(queue).await,
            Self::InMemory(b) => b.queue_stats(queue).await,
            Self::None => Ok(QueueStats {
                queue: queue.to_string(),
                ..QueueStats::default()
            }),
        }
    }

    async fn promote_due(&self, queue: &str) -> BrokerResult<u64> {
        match self {
            Self::Redis(b) => b.promote_due(queue).await,
            Self::InMemory(b) => b.promote_due(queue).await,
            Self::None => Ok(0),
        }
    }

    async fn prune(
        &self,
        queue: &str,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> BrokerResult<u64> {
        match self {
            Self::Redis(b) => b.prune(queue, completed_retention, failed_retention).await,
            Self::InMemory(b) => b.prune(queue, completed_retention, failed_retention).await,
            Self::None => Ok(0),
        }
    }
}

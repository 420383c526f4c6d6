//! Queue manager: the composition root for queue access.
//!
//! Owns the broker handle and every worker pool. Callers construct one
//! manager during application startup and pass it (or clones of its broker
//! handle) to whatever needs queue access; nothing here reaches for global
//! state or lazily materializes queues behind the caller's back.

use super::broker::{BrokerProvider, BrokerResult, JobBroker};
use super::job::{EnqueueOptions, Job, QueueStats};
use super::states::JobState;
use super::worker::{JobHandler, WorkerPool};
use crate::config::QueueConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What happened to an enqueue request
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Job persisted; workers will pick it up
    Queued { job: Job },
    /// No broker configured: the caller must execute the operation inline
    Sync,
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued { job } => Some(&job.id),
            Self::Sync => None,
        }
    }
}

/// Result of a status lookup
#[derive(Debug, Clone, PartialEq)]
pub enum JobLookup {
    Found(Job),
    NotFound,
}

/// Central registry over one broker and its worker pools
pub struct QueueManager {
    broker: Arc<BrokerProvider>,
    config: QueueConfig,
    pools: parking_lot::Mutex<Vec<Arc<WorkerPool>>>,
}

impl QueueManager {
    pub fn new(broker: BrokerProvider, config: QueueConfig) -> Self {
        Self {
            broker: Arc::new(broker),
            config,
            pools: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Connect per configuration, degrading to synchronous passthrough when
    /// no broker URL is set or the connection fails
    pub async fn from_config(redis_url: Option<&str>, config: QueueConfig) -> Self {
        let broker = BrokerProvider::from_config(redis_url, &config).await;
        Self::new(broker, config)
    }

    /// Manager over an in-process broker (single-process mode, tests)
    pub fn in_memory(config: QueueConfig) -> Self {
        let broker = BrokerProvider::in_memory(&config);
        Self::new(broker, config)
    }

    /// Whether enqueued work will actually be queued (vs. executed inline)
    pub fn is_configured(&self) -> bool {
        self.broker.is_configured()
    }

    /// Shared broker handle, for progress reporters and direct access
    pub fn broker(&self) -> Arc<BrokerProvider> {
        Arc::clone(&self.broker)
    }

    pub fn queue_config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue, or signal inline execution when no broker is configured
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> BrokerResult<EnqueueOutcome> {
        if !self.broker.is_configured() {
            return Ok(EnqueueOutcome::Sync);
        }
        let job = self.broker.enqueue(queue, job_type, payload, options).await?;
        Ok(EnqueueOutcome::Queued { job })
    }

    /// Register and start a worker pool for a queue
    pub fn register_worker(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
        concurrency: Option<usize>,
    ) -> Arc<WorkerPool> {
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.broker),
            queue,
            handler,
            concurrency.unwrap_or(self.config.default_concurrency),
            Duration::from_millis(self.config.poll_interval_ms),
        ));
        pool.start();
        self.pools.lock().push(Arc::clone(&pool));
        pool
    }

    pub async fn job_status(&self, queue: &str, job_id: &str) -> BrokerResult<JobLookup> {
        Ok(match self.broker.get_job(queue, job_id).await? {
            Some(job) => JobLookup::Found(job),
            None => JobLookup::NotFound,
        })
    }

    pub async fn list_jobs(
        &self,
        queue: &str,
        state: Option<JobState>,
        limit: usize,
    ) -> BrokerResult<Vec<Job>> {
        self.broker.list_jobs(queue, state, limit).await
    }

    /// Cancel a not-yet-started job; `false` when it already ran or is
    /// unknown
    pub async fn cancel(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        self.broker.cancel(queue, job_id).await
    }

    pub async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        self.broker.queue_stats(queue).await
    }

    /// Drop terminal jobs past their configured retention
    pub async fn prune(&self, queue: &str) -> BrokerResult<u64> {
        self.broker
            .prune(
                queue,
                Duration::from_secs(self.config.completed_retention_seconds),
                Duration::from_secs(self.config.failed_retention_seconds),
            )
            .await
    }

    /// Gracefully drain every registered worker pool
    pub async fn shutdown_all(&self) {
        let pools: Vec<Arc<WorkerPool>> = std::mem::take(&mut *self.pools.lock());
        for pool in &pools {
            pool.shutdown().await;
        }
        info!(pools = pools.len(), "All worker pools shut down");
    }
}

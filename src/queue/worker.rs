//! Worker pool: bounded concurrent executors over one queue.
//!
//! Each executor loops claim -> execute -> complete/fail. Shutdown is
//! graceful: executors stop claiming once signalled but always run the job
//! in hand to completion before exiting.

use super::broker::{BrokerProvider, JobBroker};
use super::job::Job;
use super::progress::ProgressReporter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handler-reported execution failure
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<crate::errors::AiflowError> for JobFailure {
    fn from(error: crate::errors::AiflowError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<serde_json::Error> for JobFailure {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("Result serialization failed: {error}"))
    }
}

/// Everything a handler gets for one execution attempt
pub struct JobContext {
    pub job: Job,
    pub progress: ProgressReporter,
}

/// Executes one job type family; registered per queue
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job and return its result payload. Errors count as a failed
    /// attempt and go through the retry policy.
    async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure>;
}

/// Pool of executor tasks polling one queue
pub struct WorkerPool {
    broker: Arc<BrokerProvider>,
    queue: String,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<BrokerProvider>,
        queue: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            broker,
            queue: queue.into(),
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown_tx,
            shutdown_rx,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the executor tasks. Idempotent per pool instance: calling twice
    /// doubles the executors, so managers call it exactly once.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for worker_id in 0..self.concurrency {
            let broker = Arc::clone(&self.broker);
            let handler = Arc::clone(&self.handler);
            let queue = self.queue.clone();
            let poll_interval = self.poll_interval;
            let shutdown_rx = self.shutdown_rx.clone();

            handles.push(tokio::spawn(async move {
                executor_loop(worker_id, broker, queue, handler, poll_interval, shutdown_rx).await;
            }));
        }
        info!(
            queue = %self.queue,
            concurrency = self.concurrency,
            "Worker pool started"
        );
    }

    /// Signal shutdown and wait for every executor to drain its current job
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            return;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = %self.queue, error = %e, "Executor task panicked");
            }
        }
        info!(queue = %self.queue, "Worker pool drained");
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

async fn executor_loop(
    worker_id: usize,
    broker: Arc<BrokerProvider>,
    queue: String,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(queue = %queue, worker_id = worker_id, "Executor started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Err(e) = broker.promote_due(&queue).await {
            warn!(queue = %queue, error = %e, "Delayed-job promotion failed");
        }

        match broker.claim_next(&queue).await {
            Ok(Some(job)) => {
                execute_job(&broker, &queue, handler.as_ref(), job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "Claim failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    debug!(queue = %queue, worker_id = worker_id, "Executor stopped");
}

async fn execute_job(broker: &Arc<BrokerProvider>, queue: &str, handler: &dyn JobHandler, job: Job) {
    let job_id = job.id.clone();
    let job_type = job.job_type.clone();
    let attempt = job.attempts;
    debug!(queue = %queue, job_id = %job_id, job_type = %job_type, attempt = attempt, "Executing job");

    let context = JobContext {
        progress: ProgressReporter::new(Arc::clone(broker), queue, &job_id),
        job,
    };

    match handler.execute(&context).await {
        Ok(result) => {
            if let Err(e) = broker.complete(queue, &job_id, result).await {
                error!(queue = %queue, job_id = %job_id, error = %e, "Failed to record completion");
            }
        }
        Err(failure) => {
            warn!(
                queue = %queue,
                job_id = %job_id,
                job_type = %job_type,
                attempt = attempt,
                error = %failure,
                "Job attempt failed"
            );
            if let Err(e) = broker.fail(queue, &job_id, &failure.message).await {
                error!(queue = %queue, job_id = %job_id, error = %e, "Failed to record failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::job::{EnqueueOptions, RetryPolicy};
    use crate::queue::states::JobState;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoHandler;

    #[async_trait::async_trait]
    impl JobHandler for EchoHandler {
        async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure> {
            context.progress.report_fraction(1.0).await;
            Ok(json!({"echo": context.job.payload}))
        }
    }

    struct FlakyHandler {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait::async_trait]
    impl JobHandler for FlakyHandler {
        async fn execute(&self, _context: &JobContext) -> Result<serde_json::Value, JobFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(json!({"succeeded_on": call}))
            } else {
                Err(JobFailure::new("transient provider error"))
            }
        }
    }

    async fn wait_for_state(
        broker: &Arc<BrokerProvider>,
        queue: &str,
        job_id: &str,
        state: JobState,
    ) -> Job {
        for _ in 0..200 {
            if let Some(job) = broker.get_job(queue, job_id).await.unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {state}");
    }

    #[tokio::test]
    async fn test_pool_executes_and_completes() {
        let broker = Arc::new(BrokerProvider::in_memory(&QueueConfig::default()));
        let pool = WorkerPool::new(
            Arc::clone(&broker),
            "ai-jobs",
            Arc::new(EchoHandler),
            2,
            Duration::from_millis(10),
        );
        pool.start();

        let job = broker
            .enqueue("ai-jobs", "echo", json!({"n": 1}), &EnqueueOptions::default())
            .await
            .unwrap();

        let done = wait_for_state(&broker, "ai-jobs", &job.id, JobState::Completed).await;
        assert_eq!(done.progress, 100);
        assert_eq!(done.result, Some(json!({"echo": {"n": 1}})));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_retries_then_succeeds() {
        let broker = Arc::new(BrokerProvider::in_memory(&QueueConfig::default()));
        let handler = Arc::new(FlakyHandler { calls: AtomicU32::new(0), succeed_on: 2 });
        let pool = WorkerPool::new(
            Arc::clone(&broker),
            "ai-jobs",
            handler,
            1,
            Duration::from_millis(10),
        );
        pool.start();

        // Tight backoff so the retry lands within the test window
        let options = EnqueueOptions {
            retry: Some(RetryPolicy { max_attempts: 3, base_delay_ms: 20, cap_delay_ms: 100 }),
            ..Default::default()
        };
        let job = broker
            .enqueue("ai-jobs", "flaky", json!({}), &options)
            .await
            .unwrap();

        let done = wait_for_state(&broker, "ai-jobs", &job.id, JobState::Completed).await;
        assert_eq!(done.attempts, 2);
        assert_eq!(done.result, Some(json!({"succeeded_on": 2})));
        assert!(done.error.is_none(), "earlier attempt error must not survive success");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_failed() {
        let broker = Arc::new(BrokerProvider::in_memory(&QueueConfig::default()));
        let handler = Arc::new(FlakyHandler { calls: AtomicU32::new(0), succeed_on: u32::MAX });
        let pool = WorkerPool::new(
            Arc::clone(&broker),
            "ai-jobs",
            handler,
            1,
            Duration::from_millis(10),
        );
        pool.start();

        let options = EnqueueOptions {
            retry: Some(RetryPolicy { max_attempts: 2, base_delay_ms: 10, cap_delay_ms: 50 }),
            ..Default::default()
        };
        let job = broker
            .enqueue("ai-jobs", "flaky", json!({}), &options)
            .await
            .unwrap();

        let done = wait_for_state(&broker, "ai-jobs", &job.id, JobState::Failed).await;
        assert_eq!(done.attempts, 2);
        assert_eq!(done.error.as_deref(), Some("transient provider error"));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_claiming() {
        let broker = Arc::new(BrokerProvider::in_memory(&QueueConfig::default()));
        let pool = WorkerPool::new(
            Arc::clone(&broker),
            "ai-jobs",
            Arc::new(EchoHandler),
            1,
            Duration::from_millis(10),
        );
        pool.start();
        pool.shutdown().await;

        let job = broker
            .enqueue("ai-jobs", "echo", json!({}), &EnqueueOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stored = broker.get_job("ai-jobs", &job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Waiting);
    }
}

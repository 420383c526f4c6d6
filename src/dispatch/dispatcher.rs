//! Dispatcher: submits AI jobs to the queue and wires the handler registry
//! into a worker pool at startup.

use super::collaborators::{AiProvider, CoverageAnalyzer};
use super::handlers::{
    BatchTestsHandler, CoverageAnalysisHandler, HandlerRegistry, RiskAnalysisHandler,
};
use super::payloads::{
    BatchTestsPayload, CoverageAnalysisPayload, RiskAnalysisPayload, BATCH_GENERATE_TESTS,
    COMPLEX_RISK_ANALYSIS, COVERAGE_ANALYSIS,
};
use crate::queue::{
    BrokerError, EnqueueOptions, EnqueueOutcome, Job, JobContext, JobHandler, ProgressReporter,
    QueueManager, RetryPolicy, DEFAULT_PRIORITY,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Queue all AI jobs run on
pub const AI_JOBS_QUEUE: &str = "ai-jobs";

/// Errors surfaced by submit operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Inline (passthrough) execution failed; queued execution reports
    /// failures through job status instead
    #[error("Inline execution failed: {0}")]
    InlineExecution(String),
}

/// What a submit operation produced
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Job queued; poll status by id
    Queued { job_id: String },
    /// No broker configured: executed inline, result is already final
    Inline { result: serde_json::Value },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued { job_id } => Some(job_id),
            Self::Inline { .. } => None,
        }
    }
}

/// Submits AI jobs and owns their handler wiring
pub struct JobDispatcher {
    manager: Arc<QueueManager>,
    registry: Arc<HandlerRegistry>,
}

impl JobDispatcher {
    /// Wire handlers for every job type and, when a broker is configured,
    /// register a worker pool executing through the registry
    pub fn new(
        manager: Arc<QueueManager>,
        analyzer: Arc<dyn CoverageAnalyzer>,
        provider: Arc<dyn AiProvider>,
    ) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(COVERAGE_ANALYSIS, Arc::new(CoverageAnalysisHandler::new(analyzer)));
        registry.register(
            BATCH_GENERATE_TESTS,
            Arc::new(BatchTestsHandler::new(Arc::clone(&provider))),
        );
        registry.register(COMPLEX_RISK_ANALYSIS, Arc::new(RiskAnalysisHandler::new(provider)));

        if manager.is_configured() {
            manager.register_worker(AI_JOBS_QUEUE, Arc::clone(&registry) as Arc<dyn JobHandler>, None);
        } else {
            info!("Queue unconfigured; AI jobs will execute inline at submit time");
        }

        Self { manager, registry }
    }

    pub fn queue_manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub async fn submit_coverage_analysis(
        &self,
        payload: CoverageAnalysisPayload,
        options: &EnqueueOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        self.submit(COVERAGE_ANALYSIS, serde_json::to_value(payload)?, options).await
    }

    pub async fn submit_batch_tests(
        &self,
        payload: BatchTestsPayload,
        options: &EnqueueOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        self.submit(BATCH_GENERATE_TESTS, serde_json::to_value(payload)?, options).await
    }

    pub async fn submit_complex_risk_analysis(
        &self,
        payload: RiskAnalysisPayload,
        options: &EnqueueOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        self.submit(COMPLEX_RISK_ANALYSIS, serde_json::to_value(payload)?, options).await
    }

    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        match self.manager.enqueue(AI_JOBS_QUEUE, job_type, payload.clone(), options).await? {
            EnqueueOutcome::Queued { job } => {
                info!(job_id = %job.id, job_type = job_type, "AI job queued");
                Ok(SubmitOutcome::Queued { job_id: job.id })
            }
            EnqueueOutcome::Sync => self.execute_inline(job_type, payload, options).await,
        }
    }

    /// Passthrough mode: run the handler right here, with a silent
    /// progress reporter, and hand the caller the finished result
    async fn execute_inline(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        let context = JobContext {
            job: Job::new(
                Uuid::new_v4().to_string(),
                job_type,
                payload,
                options.priority.unwrap_or(DEFAULT_PRIORITY),
                options.retry.unwrap_or_else(RetryPolicy::default),
            ),
            progress: ProgressReporter::noop(),
        };

        info!(job_type = job_type, "Executing AI job inline (no broker configured)");
        let result = self
            .registry
            .execute(&context)
            .await
            .map_err(|e| DispatchError::InlineExecution(e.message))?;
        Ok(SubmitOutcome::Inline { result })
    }
}

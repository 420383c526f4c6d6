//! Job handlers for the AI job types, plus the registry the worker pool
//! executes through.
//!
//! Batch handlers run their items sequentially: one external call in
//! flight per job bounds provider load and keeps progress monotonic. An
//! item's failure is captured in the aggregated result; it never fails the
//! job. The coverage handler is the non-decomposable case: its collaborator
//! error propagates and the job fails (and retries per policy).

use super::collaborators::{AiProvider, CoverageAnalyzer};
use super::payloads::{
    BatchOutcome, BatchTestsPayload, CoverageAnalysisPayload, ItemOutcome, RiskAnalysisPayload,
};
use crate::queue::{JobContext, JobFailure, JobHandler, ProgressReporter};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Share of the progress window reserved for payload parsing / setup
const INITIAL_PROGRESS: u8 = 10;

fn parse_payload<T: serde::de::DeserializeOwned>(context: &JobContext) -> Result<T, JobFailure> {
    serde_json::from_value(context.job.payload.clone())
        .map_err(|e| JobFailure::new(format!("Invalid {} payload: {e}", context.job.job_type)))
}

/// Runs each batch item through `call`, capturing per-item outcomes and
/// advancing the given window proportionally
async fn run_batch<F, Fut>(items: &[serde_json::Value], window: &ProgressReporter, call: F) -> BatchOutcome
where
    F: Fn(usize, serde_json::Value) -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, super::ProviderError>>,
{
    let total = items.len().max(1) as f64;
    let mut results = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let item_window = window.subrange(index as f64 / total, (index + 1) as f64 / total);
        match call(index, item.clone()).await {
            Ok(result) => results.push(ItemOutcome::success(index, result)),
            Err(e) => {
                warn!(task_id = index, error = %e, "Batch item failed");
                results.push(ItemOutcome::failure(index, e.to_string()));
            }
        }
        item_window.report_fraction(1.0).await;
    }

    BatchOutcome::from_results(results)
}

/// Handler for `coverage-analysis`
pub struct CoverageAnalysisHandler {
    analyzer: Arc<dyn CoverageAnalyzer>,
}

impl CoverageAnalysisHandler {
    pub fn new(analyzer: Arc<dyn CoverageAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl JobHandler for CoverageAnalysisHandler {
    async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure> {
        let payload: CoverageAnalysisPayload = parse_payload(context)?;
        context.progress.report_percent(INITIAL_PROGRESS).await;

        let analysis_window = context.progress.subrange(INITIAL_PROGRESS as f64 / 100.0, 1.0);
        let report = self
            .analyzer
            .analyze(
                &payload.requirements,
                &payload.test_cases,
                &payload.model,
                &payload.token,
                &analysis_window,
            )
            .await
            .map_err(|e| JobFailure::new(e.to_string()))?;

        context.progress.report_fraction(1.0).await;
        Ok(report)
    }
}

/// Handler for `batch-generate-tests`
pub struct BatchTestsHandler {
    provider: Arc<dyn AiProvider>,
}

impl BatchTestsHandler {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobHandler for BatchTestsHandler {
    async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure> {
        let payload: BatchTestsPayload = parse_payload(context)?;
        context.progress.report_percent(INITIAL_PROGRESS).await;

        let window = context.progress.subrange(INITIAL_PROGRESS as f64 / 100.0, 1.0);
        let outcome = run_batch(&payload.tasks, &window, |_, task| {
            let provider = Arc::clone(&self.provider);
            let model = payload.model.clone();
            let token = payload.token.clone();
            async move { provider.generate(&task, &model, &token).await }
        })
        .await;

        debug!(
            total = outcome.total,
            successful = outcome.successful,
            failed = outcome.failed,
            "Batch test generation finished"
        );
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Handler for `complex-risk-analysis`
pub struct RiskAnalysisHandler {
    provider: Arc<dyn AiProvider>,
}

impl RiskAnalysisHandler {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobHandler for RiskAnalysisHandler {
    async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure> {
        let payload: RiskAnalysisPayload = parse_payload(context)?;
        context.progress.report_percent(INITIAL_PROGRESS).await;

        let window = context.progress.subrange(INITIAL_PROGRESS as f64 / 100.0, 1.0);
        let outcome = run_batch(&payload.features, &window, |_, feature| {
            let provider = Arc::clone(&self.provider);
            let model = payload.model.clone();
            let token = payload.token.clone();
            async move { provider.generate(&feature, &model, &token).await }
        })
        .await;

        debug!(
            total = outcome.total,
            successful = outcome.successful,
            failed = outcome.failed,
            "Risk analysis finished"
        );
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Handler registry populated at wiring time; the worker pool executes
/// every job through it
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn lookup(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait]
impl JobHandler for HandlerRegistry {
    async fn execute(&self, context: &JobContext) -> Result<serde_json::Value, JobFailure> {
        match self.lookup(&context.job.job_type) {
            Some(handler) => handler.execute(context).await,
            None => Err(JobFailure::new(format!(
                "No handler registered for job type '{}'",
                context.job.job_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::collaborators::ProviderError;
    use crate::dispatch::payloads::BATCH_GENERATE_TESTS;
    use crate::queue::{Job, RetryPolicy};
    use serde_json::json;

    struct ScriptedProvider {
        /// Item indexes that should fail
        fail_on: Vec<usize>,
        counter: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedProvider {
        fn failing_on(fail_on: Vec<usize>) -> Arc<Self> {
            Arc::new(Self { fail_on, counter: std::sync::atomic::AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        async fn generate(
            &self,
            input: &serde_json::Value,
            _model: &str,
            _token: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            let call = self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                Err(ProviderError::Http { status: 503, message: "model overloaded".to_string() })
            } else {
                Ok(json!({"generated_for": input}))
            }
        }
    }

    fn context_for(job_type: &str, payload: serde_json::Value) -> JobContext {
        JobContext {
            job: Job::new("job-1", job_type, payload, 10, RetryPolicy::default()),
            progress: ProgressReporter::noop(),
        }
    }

    #[tokio::test]
    async fn test_batch_handler_captures_partial_failure() {
        let handler = BatchTestsHandler::new(ScriptedProvider::failing_on(vec![1]));
        let payload = serde_json::to_value(BatchTestsPayload {
            tasks: vec![json!({"t": 0}), json!({"t": 1}), json!({"t": 2})],
            token: "tok".to_string(),
            model: "gpt-4".to_string(),
        })
        .unwrap();

        let result = handler
            .execute(&context_for(BATCH_GENERATE_TESTS, payload))
            .await
            .unwrap();
        let outcome: BatchOutcome = serde_json::from_value(result).unwrap();

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1].error.as_deref().unwrap().contains("503"));
        assert!(outcome.results[2].success);
    }

    #[tokio::test]
    async fn test_coverage_handler_propagates_collaborator_error() {
        struct FailingAnalyzer;

        #[async_trait]
        impl CoverageAnalyzer for FailingAnalyzer {
            async fn analyze(
                &self,
                _requirements: &serde_json::Value,
                _test_cases: &[serde_json::Value],
                _model: &str,
                _token: &str,
                _progress: &ProgressReporter,
            ) -> Result<serde_json::Value, ProviderError> {
                Err(ProviderError::Other("analysis backend down".to_string()))
            }
        }

        let handler = CoverageAnalysisHandler::new(Arc::new(FailingAnalyzer));
        let payload = serde_json::to_value(CoverageAnalysisPayload {
            requirements: json!("reqs"),
            test_cases: vec![],
            token: "tok".to_string(),
            model: "gpt-4".to_string(),
        })
        .unwrap();

        let result = handler
            .execute(&context_for(super::super::payloads::COVERAGE_ANALYSIS, payload))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_job_failure() {
        let handler = BatchTestsHandler::new(ScriptedProvider::failing_on(vec![]));
        let result = handler
            .execute(&context_for(BATCH_GENERATE_TESTS, json!({"not": "a payload"})))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_type() {
        let registry = HandlerRegistry::new();
        let result = registry.execute(&context_for("unknown-type", json!({}))).await;
        assert!(result.unwrap_err().message.contains("unknown-type"));
    }
}

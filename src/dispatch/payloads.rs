//! Job payloads and structured batch results.

use serde::{Deserialize, Serialize};

/// Single full coverage analysis
pub const COVERAGE_ANALYSIS: &str = "coverage-analysis";
/// Independent test-generation tasks with per-item outcomes
pub const BATCH_GENERATE_TESTS: &str = "batch-generate-tests";
/// Independent per-feature risk assessments with per-item outcomes
pub const COMPLEX_RISK_ANALYSIS: &str = "complex-risk-analysis";

/// Payload for `coverage-analysis`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageAnalysisPayload {
    pub requirements: serde_json::Value,
    pub test_cases: Vec<serde_json::Value>,
    /// Auth token reference for the external provider
    pub token: String,
    /// Target model identifier
    pub model: String,
}

/// Payload for `batch-generate-tests`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTestsPayload {
    /// Opaque task inputs, executed independently in order
    pub tasks: Vec<serde_json::Value>,
    pub token: String,
    pub model: String,
}

/// Payload for `complex-risk-analysis`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAnalysisPayload {
    /// Opaque feature descriptors, assessed independently in order
    pub features: Vec<serde_json::Value>,
    pub token: String,
    pub model: String,
}

/// Outcome of one batch item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    /// Zero-based index of the item within the batch
    pub task_id: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn success(task_id: usize, result: serde_json::Value) -> Self {
        Self { task_id, success: true, result: Some(result), error: None }
    }

    pub fn failure(task_id: usize, error: impl Into<String>) -> Self {
        Self { task_id, success: false, result: None, error: Some(error.into()) }
    }
}

/// Aggregated batch result; the job completes with this even when some
/// items failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn from_results(results: Vec<ItemOutcome>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

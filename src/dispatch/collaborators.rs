//! External collaborator seams.
//!
//! The dispatcher treats AI providers as opaque functions
//! `(input, model, token) -> result`. Implementations live outside this
//! crate; tests supply mocks.

use crate::queue::ProgressReporter;
use async_trait::async_trait;
use thiserror::Error;

/// Typed failure from an external provider call
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider answered with an error status
    #[error("Provider call failed (status {status}): {message}")]
    Http { status: u16, message: String },

    /// Transport failure, timeout, malformed response
    #[error("Provider call failed: {0}")]
    Other(String),
}

impl ProviderError {
    /// Provider-supplied status code, when one exists
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Other(_) => None,
        }
    }
}

/// A single blocking call to a generative model
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(
        &self,
        input: &serde_json::Value,
        model: &str,
        token: &str,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Longer-running coverage analysis that reports its own fractional
/// progress through the supplied reporter
#[async_trait]
pub trait CoverageAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        requirements: &serde_json::Value,
        test_cases: &[serde_json::Value],
        model: &str,
        token: &str,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, ProviderError>;
}

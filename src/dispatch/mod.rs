//! # Job Dispatcher Module
//!
//! Domain job types for AI operations, their handlers, and the dispatcher
//! that submits them to the queue. Handlers are wired into an explicit
//! registry at startup and the registry is handed to the worker pool; no
//! lazy lookup of handler modules at call time.
//!
//! Job types (closed set):
//!
//! - `coverage-analysis` — single coverage analysis call; not decomposable,
//!   so a collaborator error fails the whole job
//! - `batch-generate-tests` — N independent generation tasks with per-item
//!   success/failure capture
//! - `complex-risk-analysis` — N independent feature assessments, same
//!   partial-failure policy
//!
//! When the queue runs in synchronous passthrough (no broker configured)
//! the dispatcher executes the handler inline and returns the completed
//! result directly.

pub mod collaborators;
pub mod dispatcher;
pub mod handlers;
pub mod payloads;

pub use collaborators::{AiProvider, CoverageAnalyzer, ProviderError};
pub use dispatcher::{DispatchError, JobDispatcher, SubmitOutcome};
pub use handlers::{
    BatchTestsHandler, CoverageAnalysisHandler, HandlerRegistry, RiskAnalysisHandler,
};
pub use payloads::{
    BatchOutcome, BatchTestsPayload, CoverageAnalysisPayload, ItemOutcome, RiskAnalysisPayload,
    BATCH_GENERATE_TESTS, COMPLEX_RISK_ANALYSIS, COVERAGE_ANALYSIS,
};

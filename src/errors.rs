//! Error types for the aiflow core.
//!
//! Each component defines its own error enum (`CacheError`, `BrokerError`,
//! `DispatchError`); this module provides the crate-level error that they
//! convert into at the public surface.

use thiserror::Error;

/// Top-level error for aiflow core operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AiflowError {
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Broker error: {0}")]
    BrokerError(String),
    #[error("Dispatch error: {0}")]
    DispatchError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Worker error: {0}")]
    WorkerError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for AiflowError {
    fn from(error: serde_json::Error) -> Self {
        AiflowError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::cache::CacheError> for AiflowError {
    fn from(error: crate::cache::CacheError) -> Self {
        AiflowError::CacheError(error.to_string())
    }
}

impl From<crate::queue::BrokerError> for AiflowError {
    fn from(error: crate::queue::BrokerError) -> Self {
        AiflowError::BrokerError(error.to_string())
    }
}

impl From<crate::dispatch::DispatchError> for AiflowError {
    fn from(error: crate::dispatch::DispatchError) -> Self {
        AiflowError::DispatchError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AiflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AiflowError::BrokerError("connection refused".to_string());
        assert_eq!(err.to_string(), "Broker error: connection refused");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: AiflowError = parse_err.into();
        assert!(matches!(err, AiflowError::ValidationError(_)));
    }
}

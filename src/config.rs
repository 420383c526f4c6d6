//! Environment-driven configuration for the cache and queue components.
//!
//! Absence of `AIFLOW_REDIS_URL` is meaningful: the queue degrades to
//! synchronous passthrough and the cache to an always-miss no-op. Neither
//! component ever fails to start because the backend is unreachable.

use crate::errors::{AiflowError, Result};

/// Top-level configuration for the aiflow core
#[derive(Debug, Clone)]
pub struct AiflowConfig {
    /// Redis connection URL shared by the cache and the job broker.
    /// `None` means no durable backend is configured.
    pub redis_url: Option<String>,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
}

/// Queue and worker pool configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Key namespace prefix for broker state
    pub namespace: String,
    /// Executors per registered worker pool
    pub default_concurrency: usize,
    /// Idle poll interval when the queue is empty
    pub poll_interval_ms: u64,
    /// Maximum execution attempts per job
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,
    /// Upper bound on retry backoff
    pub backoff_cap_ms: u64,
    /// How long completed jobs are kept before pruning
    pub completed_retention_seconds: u64,
    /// Failed jobs are retained longer for diagnosis
    pub failed_retention_seconds: u64,
}

/// Result cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Key namespace prefix, `ai` by convention
    pub namespace: String,
    /// Fallback TTL when the caller does not supply one
    pub default_ttl_seconds: u64,
}

impl Default for AiflowConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: "aiflow".to_string(),
            default_concurrency: 2,
            poll_interval_ms: 500,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 60_000,
            completed_retention_seconds: 3600,
            failed_retention_seconds: 86_400,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "ai".to_string(),
            default_ttl_seconds: 1800,
        }
    }
}

impl AiflowConfig {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("AIFLOW_REDIS_URL") {
            if !url.is_empty() {
                config.redis_url = Some(url);
            }
        }

        if let Ok(concurrency) = std::env::var("AIFLOW_WORKER_CONCURRENCY") {
            config.queue.default_concurrency = concurrency.parse().map_err(|e| {
                AiflowError::ConfigurationError(format!("Invalid worker concurrency: {e}"))
            })?;
        }

        if let Ok(max_attempts) = std::env::var("AIFLOW_MAX_ATTEMPTS") {
            config.queue.max_attempts = max_attempts.parse().map_err(|e| {
                AiflowError::ConfigurationError(format!("Invalid max attempts: {e}"))
            })?;
        }

        if let Ok(base_ms) = std::env::var("AIFLOW_BACKOFF_BASE_MS") {
            config.queue.backoff_base_ms = base_ms.parse().map_err(|e| {
                AiflowError::ConfigurationError(format!("Invalid backoff base: {e}"))
            })?;
        }

        if let Ok(ttl) = std::env::var("AIFLOW_CACHE_TTL_SECONDS") {
            config.cache.default_ttl_seconds = ttl.parse().map_err(|e| {
                AiflowError::ConfigurationError(format!("Invalid cache TTL: {e}"))
            })?;
        }

        if let Ok(enabled) = std::env::var("AIFLOW_CACHE_ENABLED") {
            config.cache.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Env vars are process-wide, so tests that touch them must not overlap
    /// with each other or with any other `AIFLOW_*` reader
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<R>(pairs: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock();
        for (var, value) in pairs {
            std::env::set_var(var, value);
        }
        let result = f();
        for (var, _) in pairs {
            std::env::remove_var(var);
        }
        result
    }

    #[test]
    fn test_defaults() {
        let config = AiflowConfig::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.queue.default_concurrency, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff_base_ms, 1000);
        assert_eq!(config.cache.namespace, "ai");
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_invalid_concurrency_rejected() {
        let result = with_env(&[("AIFLOW_WORKER_CONCURRENCY", "not-a-number")], || {
            AiflowConfig::from_env()
        });
        assert!(matches!(
            result,
            Err(AiflowError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_env_overrides_applied() {
        let config = with_env(
            &[
                ("AIFLOW_WORKER_CONCURRENCY", "8"),
                ("AIFLOW_MAX_ATTEMPTS", "5"),
                ("AIFLOW_CACHE_ENABLED", "false"),
            ],
            || AiflowConfig::from_env(),
        )
        .unwrap();

        assert_eq!(config.queue.default_concurrency, 8);
        assert_eq!(config.queue.max_attempts, 5);
        assert!(!config.cache.enabled);
    }
}

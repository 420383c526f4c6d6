//! Cache provider with integrated circuit breaker
//!
//! Enum dispatch over the concrete stores; circuit breaker protection is an
//! internal detail for the distributed (Redis) backend. When the circuit is
//! open, reads behave as misses and writes as no-ops, so a flapping backend
//! costs one timeout per reset window instead of one per request.

use super::errors::CacheResult;
use super::providers::{MemoryCacheStore, NoOpCacheStore, RedisCacheStore};
use super::traits::CacheStore;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Internal cache backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum CacheBackend {
    /// Redis store (boxed to reduce enum size)
    Redis(Box<RedisCacheStore>),
    /// Moka in-process store (single instance only)
    Memory(MemoryCacheStore),
    /// No-op store (always miss, always succeed)
    NoOp(NoOpCacheStore),
}

impl CacheBackend {
    fn is_distributed(&self) -> bool {
        matches!(self, Self::Redis(_))
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        match self {
            Self::Redis(s) => s.delete_pattern(pattern).await,
            Self::Memory(s) => s.delete_pattern(pattern).await,
            Self::NoOp(s) => s.delete_pattern(pattern).await,
        }
    }

    async fn count_pattern(&self, pattern: &str) -> CacheResult<u64> {
        match self {
            Self::Redis(s) => s.count_pattern(pattern).await,
            Self::Memory(s) => s.count_pattern(pattern).await,
            Self::NoOp(s) => s.count_pattern(pattern).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

/// Cache provider with graceful construction and circuit breaker protection
///
/// If Redis is configured but fails to connect, logs a warning and falls
/// back to the NoOp store instead. The system never fails to start because
/// of cache issues.
#[derive(Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("backend", &self.backend)
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .finish()
    }
}

impl CacheProvider {
    /// Create a provider from an optional Redis URL with graceful degradation
    pub async fn from_url_graceful(redis_url: Option<&str>, enabled: bool) -> Self {
        if !enabled {
            info!("Result cache disabled by configuration");
            return Self::noop();
        }

        let Some(url) = redis_url else {
            info!("No Redis URL configured, result cache degrades to always-miss");
            return Self::noop();
        };

        match RedisCacheStore::connect(url).await {
            Ok(store) => {
                info!(backend = "redis", "Result cache provider initialized");
                let cb = CircuitBreaker::new("cache", CircuitBreakerConfig::default());
                Self {
                    backend: CacheBackend::Redis(Box::new(store)),
                    circuit_breaker: Some(Arc::new(cb)),
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, falling back to NoOp cache (graceful degradation)"
                );
                Self::noop()
            }
        }
    }

    /// Create a NoOp provider (for explicit opt-out or testing)
    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheStore::new()),
            circuit_breaker: None,
        }
    }

    /// Create a Moka-backed in-process provider.
    ///
    /// No circuit breaker: local memory cannot flap. Single-instance
    /// deployments only; invalidations do not cross process boundaries.
    pub fn in_memory(max_capacity: u64, default_ttl: Duration) -> Self {
        Self {
            backend: CacheBackend::Memory(MemoryCacheStore::new(max_capacity, default_ttl)),
            circuit_breaker: None,
        }
    }

    /// Breaker applies only to the distributed backend
    fn breaker_for_backend(&self) -> Option<&CircuitBreaker> {
        if self.backend.is_distributed() {
            self.circuit_breaker.as_deref()
        } else {
            None
        }
    }

    /// Check if caching is actually enabled (not NoOp)
    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    /// Get the store name
    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// Get current circuit breaker state (for monitoring)
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// Get a value from cache
    ///
    /// If circuit is open, returns `Ok(None)` (cache miss behavior).
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let Some(cb) = self.breaker_for_backend() else {
            return self.backend.get(key).await;
        };
        if !cb.should_allow() {
            debug!(key = key, "Cache circuit open, returning miss");
            return Ok(None);
        }

        let result = self.backend.get(key).await;
        match &result {
            Ok(_) => cb.record_success(),
            Err(_) => cb.record_failure(),
        }
        result
    }

    /// Set a value in cache with TTL
    ///
    /// If circuit is open, returns `Ok(())` (no-op behavior).
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let Some(cb) = self.breaker_for_backend() else {
            return self.backend.set(key, value, ttl).await;
        };
        if !cb.should_allow() {
            debug!(key = key, "Cache circuit open, skipping set");
            return Ok(());
        }

        let result = self.backend.set(key, value, ttl).await;
        match &result {
            Ok(_) => cb.record_success(),
            Err(_) => cb.record_failure(),
        }
        result
    }

    /// Delete keys matching a pattern (uses SCAN, non-blocking)
    ///
    /// If circuit is open, returns `Ok(0)` (no-op behavior).
    pub async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let Some(cb) = self.breaker_for_backend() else {
            return self.backend.delete_pattern(pattern).await;
        };
        if !cb.should_allow() {
            debug!(pattern = pattern, "Cache circuit open, skipping delete_pattern");
            return Ok(0);
        }

        let result = self.backend.delete_pattern(pattern).await;
        match &result {
            Ok(_) => cb.record_success(),
            Err(_) => cb.record_failure(),
        }
        result
    }

    /// Count keys matching a pattern
    ///
    /// If circuit is open, returns `Ok(0)`.
    pub async fn count_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let Some(cb) = self.breaker_for_backend() else {
            return self.backend.count_pattern(pattern).await;
        };
        if !cb.should_allow() {
            return Ok(0);
        }

        let result = self.backend.count_pattern(pattern).await;
        match &result {
            Ok(_) => cb.record_success(),
            Err(_) => cb.record_failure(),
        }
        result
    }

    /// Health check the cache backend
    ///
    /// If circuit is open, returns `Ok(false)` (unhealthy).
    pub async fn health_check(&self) -> CacheResult<bool> {
        let Some(cb) = self.breaker_for_backend() else {
            return self.backend.health_check().await;
        };
        if !cb.should_allow() {
            debug!("Cache circuit open, returning unhealthy");
            return Ok(false);
        }

        let result = self.backend.health_check().await;
        match &result {
            Ok(true) => cb.record_success(),
            Ok(false) | Err(_) => cb.record_failure(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_provider_is_not_enabled() {
        let provider = CacheProvider::noop();
        assert!(!provider.is_enabled());
        assert_eq!(provider.provider_name(), "noop");
        assert!(provider.circuit_state().is_none());
    }

    #[tokio::test]
    async fn test_from_url_disabled() {
        let provider = CacheProvider::from_url_graceful(Some("redis://localhost"), false).await;
        assert!(!provider.is_enabled());
    }

    #[tokio::test]
    async fn test_from_url_unconfigured() {
        let provider = CacheProvider::from_url_graceful(None, true).await;
        assert!(!provider.is_enabled());
        assert_eq!(provider.provider_name(), "noop");
    }

    #[tokio::test]
    async fn test_in_memory_provider_round_trips_without_breaker() {
        let provider = CacheProvider::in_memory(100, Duration::from_secs(60));
        assert!(provider.is_enabled());
        assert_eq!(provider.provider_name(), "memory");
        // Local memory gets no circuit breaker
        assert!(provider.circuit_state().is_none());

        provider.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(provider.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(provider.delete_pattern("k*").await.unwrap(), 1);
        assert_eq!(provider.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_operations_pass_through() {
        let provider = CacheProvider::noop();
        assert_eq!(provider.get("k").await.unwrap(), None);
        provider
            .set("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(provider.delete_pattern("k:*").await.unwrap(), 0);
        assert!(provider.health_check().await.unwrap());
    }
}

//! No-op cache store
//!
//! Always returns None/success. Used when caching is disabled or when
//! Redis is unavailable (graceful degradation).

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheStore;
use std::time::Duration;

/// No-op cache store that never caches anything
///
/// All reads return None, all writes succeed silently.
#[derive(Debug, Clone, Default)]
pub struct NoOpCacheStore;

impl NoOpCacheStore {
    pub fn new() -> Self {
        Self
    }
}

impl CacheStore for NoOpCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        Ok(0)
    }

    async fn count_pattern(&self, _pattern: &str) -> CacheResult<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_get_returns_none() {
        let store = NoOpCacheStore::new();
        assert_eq!(store.get("any_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_set_succeeds() {
        let store = NoOpCacheStore::new();
        store
            .set("key", "value", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_noop_delete_pattern_returns_zero() {
        let store = NoOpCacheStore::new();
        assert_eq!(store.delete_pattern("prefix:*").await.unwrap(), 0);
        assert_eq!(store.count_pattern("prefix:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_noop_health_check_returns_true() {
        let store = NoOpCacheStore::new();
        assert!(store.health_check().await.unwrap());
    }
}

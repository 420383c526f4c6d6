//! In-memory cache store using Moka
//!
//! Provides in-process caching with TTL support for single-instance
//! deployments and for the test suite.
//!
//! **Important**: This cache is NOT distributed. Each process maintains its
//! own cache state, so invalidations issued by one worker are invisible to
//! others. Multi-instance deployments should use the Redis store.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheStore;
use std::time::Duration;
use tracing::debug;

/// In-memory cache store backed by `moka::future::Cache`
///
/// All entries share the TTL configured at construction time; the per-call
/// TTL is ignored. Pattern operations walk the live entries, which is fine
/// at in-process entry counts.
#[derive(Clone)]
pub struct MemoryCacheStore {
    cache: moka::future::Cache<String, String>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Patterns are structured key prefixes ending in `*`; anything else is an
/// exact key match
fn key_matches(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .build();

        debug!(
            max_capacity = max_capacity,
            ttl_seconds = default_ttl.as_secs(),
            "In-memory cache store created"
        );

        Self { cache, default_ttl }
    }

    /// Keys currently live under the given pattern
    async fn matching_keys(&self, pattern: &str) -> Vec<String> {
        // Flush pending writes so the iterator sees recent inserts
        self.cache.run_pending_tasks().await;
        self.cache
            .iter()
            .filter(|(key, _)| key_matches(key.as_str(), pattern))
            .map(|(key, _)| key.as_ref().clone())
            .collect()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> CacheResult<()> {
        // Moka TTL is cache-level, set at construction; the per-entry TTL
        // is honored only by the Redis store
        self.cache.insert(key.to_string(), value.to_string()).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.matching_keys(pattern).await;
        for key in &keys {
            self.cache.invalidate(key).await;
        }
        debug!(pattern = pattern, removed = keys.len(), "Pattern delete (memory)");
        Ok(keys.len() as u64)
    }

    async fn count_pattern(&self, pattern: &str) -> CacheResult<u64> {
        Ok(self.matching_keys(pattern).await.len() as u64)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        // In-memory cache is always healthy
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryCacheStore {
        MemoryCacheStore::new(100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_memory_get_returns_none_on_miss() {
        assert_eq!(store().get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_set_and_get() {
        let store = store();
        store
            .set("test_key", r#"{"name":"test"}"#, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("test_key").await.unwrap(),
            Some(r#"{"name":"test"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = store();
        store.set("to_delete", "value", Duration::from_secs(60)).await.unwrap();
        assert!(store.get("to_delete").await.unwrap().is_some());

        store.delete("to_delete").await.unwrap();
        assert!(store.get("to_delete").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_delete_pattern_scopes_to_prefix() {
        let store = store();
        store.set("ai:chatgpt:gpt-4:coverage:a", "1", Duration::from_secs(60)).await.unwrap();
        store.set("ai:chatgpt:gpt-4:risk:b", "2", Duration::from_secs(60)).await.unwrap();
        store.set("ai:gemini:gemini-pro:coverage:c", "3", Duration::from_secs(60)).await.unwrap();

        let removed = store.delete_pattern("ai:chatgpt:*").await.unwrap();
        assert_eq!(removed, 2);

        assert!(store.get("ai:chatgpt:gpt-4:coverage:a").await.unwrap().is_none());
        assert!(store.get("ai:gemini:gemini-pro:coverage:c").await.unwrap().is_some());
        assert_eq!(store.count_pattern("ai:*").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let store = MemoryCacheStore::new(100, Duration::from_millis(50));
        store.set("expiring", "value", Duration::from_millis(50)).await.unwrap();
        assert!(store.get("expiring").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("expiring").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_health_check_returns_true() {
        assert!(store().health_check().await.unwrap());
    }
}

//! Result cache facade
//!
//! Implements the caller-facing contract: fingerprint the request, look it
//! up, track hit/miss counters, and degrade to always-miss / no-op when the
//! backing store is unavailable. Backend I/O errors never propagate out of
//! this type; cache usage is best-effort from the caller's perspective.

use super::errors::CacheResult;
use super::fingerprint::{cache_key, InvalidationPattern};
use super::provider::CacheProvider;
use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A cached value together with its origin metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResult {
    /// Opaque serialized result
    pub value: serde_json::Value,
    /// When the entry was originally written
    pub cached_at: DateTime<Utc>,
    /// Originating provider
    pub provider: String,
    /// Originating model
    pub model: String,
    /// Originating feature
    pub feature: String,
    /// Size of the normalized input, in bytes
    pub input_bytes: usize,
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachedResult),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when no lookups yet
    pub hit_rate: f64,
    /// Live entries under the cache namespace
    pub entries: u64,
    /// Whether a real backend is connected (false = degraded to always-miss)
    pub enabled: bool,
    pub provider_name: String,
}

/// AI result cache keyed by request fingerprint
#[derive(Debug)]
pub struct ResultCache {
    provider: CacheProvider,
    namespace: String,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(provider: CacheProvider, config: &CacheConfig) -> Self {
        Self {
            provider,
            namespace: config.namespace.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build a cache backed by the given Redis URL, degrading to NoOp when
    /// the URL is absent or the connection fails
    pub async fn from_config(redis_url: Option<&str>, config: &CacheConfig) -> Self {
        let provider = CacheProvider::from_url_graceful(redis_url, config.enabled).await;
        Self::new(provider, config)
    }

    /// Look up a previously computed result for this request.
    ///
    /// Never errors: a cold or unavailable backing store reads as a miss.
    pub async fn get(
        &self,
        provider: &str,
        model: &str,
        feature: &str,
        input: &str,
    ) -> CacheLookup {
        let key = cache_key(&self.namespace, provider, model, feature, input);

        let raw = match self.provider.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        };

        match raw.and_then(|s| match serde_json::from_str::<CachedResult>(&s) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    provider = provider,
                    model = model,
                    feature = feature,
                    cached_at = %entry.cached_at,
                    "Result cache hit"
                );
                CacheLookup::Hit(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    /// Store a computed result under the request fingerprint.
    ///
    /// Best-effort: returns `false` (and logs) when the store is
    /// unavailable; callers treat failure as non-fatal.
    pub async fn set(
        &self,
        provider: &str,
        model: &str,
        feature: &str,
        input: &str,
        value: serde_json::Value,
        ttl_seconds: Option<u64>,
    ) -> bool {
        let key = cache_key(&self.namespace, provider, model, feature, input);
        let entry = CachedResult {
            value,
            cached_at: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            feature: feature.to_string(),
            input_bytes: input.len(),
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return false;
            }
        };

        let ttl = ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);

        match self.provider.set(&key, &serialized, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed (non-fatal)");
                false
            }
        }
    }

    /// Remove all entries matching a structured prefix pattern.
    ///
    /// Returns the number of entries removed; 0 when the store is
    /// unavailable.
    pub async fn invalidate(&self, pattern: &InvalidationPattern) -> u64 {
        let glob = pattern.to_glob(&self.namespace);
        match self.provider.delete_pattern(&glob).await {
            Ok(count) => {
                debug!(pattern = %glob, removed = count, "Cache invalidation");
                count
            }
            Err(e) => {
                warn!(pattern = %glob, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Remove all cache entries and reset hit/miss counters
    pub async fn clear(&self) -> u64 {
        let glob = format!("{}:*", self.namespace);
        let removed = match self.provider.delete_pattern(&glob).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Cache clear failed");
                0
            }
        };
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        removed
    }

    /// Snapshot hit/miss counters, live entry count, and connectivity
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        let glob = format!("{}:*", self.namespace);
        let entries = self.provider.count_pattern(&glob).await.unwrap_or(0);

        let enabled = self.provider.is_enabled()
            && self.provider.health_check().await.unwrap_or(false);

        CacheStats {
            hits,
            misses,
            hit_rate,
            entries,
            enabled,
            provider_name: self.provider.provider_name().to_string(),
        }
    }

    /// Direct health probe of the backing store
    pub async fn health_check(&self) -> CacheResult<bool> {
        self.provider.health_check().await
    }
}

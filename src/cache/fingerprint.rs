//! Request fingerprinting and key layout.
//!
//! Keys are namespaced as `ai:{provider}:{model}:{feature}:{hash}` where the
//! hash is SHA-256 over `feature:model:input`. The structured prefix lets
//! pattern invalidation target any level: a whole provider, one model, or
//! one provider+model+feature combination.

use sha2::{Digest, Sha256};

/// Compute the cache key for a normalized request.
///
/// Identical (provider, model, feature, input) tuples always produce the
/// same key; any differing field changes it.
pub fn cache_key(
    namespace: &str,
    provider: &str,
    model: &str,
    feature: &str,
    input: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feature.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{namespace}:{provider}:{model}:{feature}:{digest}")
}

/// Structured prefix pattern for cache invalidation.
///
/// Levels nest: a model pattern requires a provider, a feature pattern
/// requires both. This keeps invalidation scopes aligned with the key
/// layout instead of accepting free-form glob strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPattern {
    pub provider: String,
    pub model: Option<String>,
    pub feature: Option<String>,
}

impl InvalidationPattern {
    /// All entries for one provider
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            feature: None,
        }
    }

    /// All entries for one provider+model
    pub fn model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: Some(model.into()),
            feature: None,
        }
    }

    /// All entries for one provider+model+feature
    pub fn feature(
        provider: impl Into<String>,
        model: impl Into<String>,
        feature: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: Some(model.into()),
            feature: Some(feature.into()),
        }
    }

    /// Render as a glob pattern under the given namespace
    pub fn to_glob(&self, namespace: &str) -> String {
        match (&self.model, &self.feature) {
            (Some(model), Some(feature)) => {
                format!("{namespace}:{}:{model}:{feature}:*", self.provider)
            }
            (Some(model), None) => format!("{namespace}:{}:{model}:*", self.provider),
            _ => format!("{namespace}:{}:*", self.provider),
        }
    }
}

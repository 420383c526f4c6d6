//! # Result Cache Module
//!
//! Deduplicates identical AI requests: a normalized request fingerprint maps
//! to a previously computed result with a TTL, so repeated prompts are served
//! without re-invoking the external provider.
//!
//! ## Architecture
//!
//! ```text
//! ResultCache (facade: get/set/invalidate/clear/stats + hit/miss counters)
//!   └── CacheProvider (enum dispatch, circuit breaker protected)
//!         ├── Redis(RedisCacheStore)    <- ConnectionManager-based async Redis
//!         ├── Memory(MemoryCacheStore)  <- Moka in-process store, single instance
//!         └── NoOp(NoOpCacheStore)      <- Always-miss, always-succeed fallback
//! ```
//!
//! ## Design Decisions
//!
//! - **Enum dispatch**: zero vtable overhead for the hot get/set path
//! - **Graceful degradation**: Redis failure → NoOp fallback, never blocks startup
//! - **Best-effort writes**: cache errors logged but never propagated to callers
//! - **SCAN for patterns**: non-blocking key iteration (never uses KEYS)
//! - **Store-enforced expiry**: TTL is handed to the backend (SETEX); the
//!   application never polls for expired entries

pub mod errors;
pub mod fingerprint;
pub mod provider;
pub mod providers;
pub mod result_cache;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use fingerprint::{cache_key, InvalidationPattern};
pub use provider::CacheProvider;
pub use providers::{MemoryCacheStore, NoOpCacheStore, RedisCacheStore};
pub use result_cache::{CacheLookup, CacheStats, CachedResult, ResultCache};
pub use traits::CacheStore;

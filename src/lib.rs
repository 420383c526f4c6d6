#![allow(clippy::doc_markdown)] // Allow technical terms like SETEX, ZPOPMIN in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Aiflow Core
//!
//! Backend core decoupling slow, costly generative-AI calls from the
//! synchronous request/response cycle: a fingerprint-keyed result cache, a
//! durable job queue with worker pools, and a dispatcher defining the AI
//! job types.
//!
//! ## Architecture
//!
//! ```text
//! caller ──> ResultCache (hit? serve instantly)
//!    │ miss
//!    └────> JobDispatcher ──> QueueManager ──> BrokerProvider (Redis / in-memory / none)
//!                                   │
//!                              WorkerPool ──> HandlerRegistry ──> AI collaborators
//! ```
//!
//! Both external backends degrade gracefully: without `AIFLOW_REDIS_URL`
//! the cache becomes always-miss and the queue executes submissions inline
//! (synchronous passthrough). Backend absence never breaks a request.
//!
//! ## Module Organization
//!
//! - [`cache`] - Fingerprint-keyed AI result cache with TTL and pattern invalidation
//! - [`queue`] - Generic durable queue, broker backends, worker pools
//! - [`dispatch`] - AI job types, handlers, and the submitting dispatcher
//! - [`resilience`] - Circuit breaker guarding distributed backends
//! - [`config`] - Environment-driven configuration
//! - [`errors`] - Crate-level error type and conversions
//! - [`logging`] - Structured tracing initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aiflow_core::config::AiflowConfig;
//! use aiflow_core::cache::ResultCache;
//! use aiflow_core::queue::QueueManager;
//!
//! # async fn example() {
//! let config = AiflowConfig::from_env().unwrap_or_default();
//!
//! let cache = ResultCache::from_config(config.redis_url.as_deref(), &config.cache).await;
//! let manager = QueueManager::from_config(config.redis_url.as_deref(), config.queue).await;
//!
//! println!("queue configured: {}", manager.is_configured());
//! # let _ = cache;
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod queue;
pub mod resilience;

pub use config::AiflowConfig;
pub use errors::{AiflowError, Result};

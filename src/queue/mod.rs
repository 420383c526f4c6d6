//! # Queue & Worker Pool Module
//!
//! Durable, named queues holding units of work. Workers claim jobs and run a
//! supplied handler; persistence and cross-process visibility come from an
//! external broker (Redis). When no broker is configured the queue degrades
//! to synchronous passthrough: `enqueue` tells the caller to execute inline.
//!
//! ## Architecture
//!
//! ```text
//! QueueManager (composition-root registry: enqueue/status/list/cancel/stats)
//!   ├── BrokerProvider (enum dispatch)
//!   │     ├── Redis(RedisJobBroker)       <- durable, cross-process
//!   │     ├── InMemory(InMemoryJobBroker) <- single-process / tests
//!   │     └── None                        <- synchronous passthrough
//!   └── WorkerPool (bounded executors: claim -> handler -> complete/fail)
//! ```
//!
//! State machine: `waiting -> active -> {completed | failed}`, with
//! `failed -> delayed -> waiting` retries under exponential backoff while
//! attempts remain, and `waiting|delayed -> cancelled` (removed) on explicit
//! cancel. Claims are atomic at the broker: at most one worker holds an
//! active job system-wide.

pub mod broker;
pub mod brokers;
pub mod job;
pub mod manager;
pub mod progress;
pub mod states;
pub mod worker;

pub use broker::{BrokerError, BrokerProvider, BrokerResult, JobBroker};
pub use brokers::{InMemoryJobBroker, RedisJobBroker};
pub use job::{EnqueueOptions, Job, QueueStats, RetryPolicy, DEFAULT_PRIORITY};
pub use manager::{EnqueueOutcome, JobLookup, QueueManager};
pub use progress::ProgressReporter;
pub use states::JobState;
pub use worker::{JobContext, JobFailure, JobHandler, WorkerPool};

//! Concrete cache store implementations

pub mod memory;
pub mod noop;
pub mod redis;

pub use memory::MemoryCacheStore;
pub use noop::NoOpCacheStore;
pub use redis::RedisCacheStore;

//! Broker backend implementations

pub mod memory;
pub mod redis;

pub use memory::InMemoryJobBroker;
pub use redis::RedisJobBroker;

//! Infrastructure-backed broker implementations.
//!
//! The broker abstraction lives in `catalog-events` as pure mechanics; this
//! module provides transports that need a running service.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;

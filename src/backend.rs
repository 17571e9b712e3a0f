//! Cache backend implementations.
//!
//! - [`MemoryCache`](memory::MemoryCache) keeps everything in-process on top of a moka cache with sliding per-entry
//!   TTL. Suitable for a single shard process and for tests.
//! - [`RedisCache`](redis::RedisCache) (feature `redis`) talks to a Redis server.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

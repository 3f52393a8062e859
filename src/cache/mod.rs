//! Cache layer abstraction.
//!
//! The cache is an accelerator, never the system of record. Backends expose
//! string get/set/delete with a TTL; the service layer owns key construction
//! ([`keys`]) and serialization.
//!
//! Cache failures deliberately have their own error type, separate from
//! [`crate::Error`]: they are logged and swallowed by the services, never
//! propagated to callers. A down cache means slow reads, not failed reads.

pub mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::{DEFAULT_CAPACITY as DEFAULT_CACHE_CAPACITY, InMemoryCache};
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use std::time::Duration;
use thiserror::Error as ThisError;

/// Error type for cache operations. Internal to the crate: services convert
/// every instance into a log line and a fall-through to storage.
#[derive(Debug, ThisError)]
pub enum CacheError {
    /// The backend could not serve the request.
    #[error("cache operation '{operation}' failed: {cause}")]
    Unavailable {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl CacheError {
    pub(crate) fn unavailable(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A key-value cache with per-entry TTL.
pub trait CacheBackend: Send + Sync {
    /// Fetches a value. Expired entries read as `None`.
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores a value with a TTL.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Removes a single key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes every key starting with `prefix`. Used to drop the list-query
    /// keys that depend on an entity after a write.
    fn delete_prefix(&self, prefix: &str) -> CacheResult<()>;
}

/// No-op cache used when caching is disabled (`none://`).
///
/// Every read misses and every write vanishes, which degrades read latency
/// but changes no observable behavior, which is the defining property of the layer.
pub struct NullCache;

impl CacheBackend for NullCache {
    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    fn delete_prefix(&self, _prefix: &str) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_cache_always_misses() {
        let cache = NullCache;
        cache
            .set("k", "v", Duration::from_secs(60))
            .map_err(|_| ())
            .ok();
        assert!(matches!(cache.get("k"), Ok(None)));
    }
}

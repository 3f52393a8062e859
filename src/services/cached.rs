//! Shared cache-aside mechanics.
//!
//! Every service funnels its reads and invalidations through these helpers,
//! so the policy lives in exactly one place:
//!
//! - reads check the cache, fall through to storage on miss or error, and
//!   populate the cache best-effort afterwards
//! - writes invalidate (delete, not update) strictly after storage succeeds
//! - cache failures are logged and counted, never propagated
//!
//! There is no ordering guarantee between a write's invalidation and a
//! concurrent read's population: a reader that loaded just before the write
//! can repopulate a stale value right after the invalidation. That window is
//! bounded by the entry TTL and accepted.

use crate::Result;
use crate::cache::CacheBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Read-through for a single optional entity.
///
/// Only present values are cached; absence is always re-checked against
/// storage so a later create becomes visible immediately.
pub(crate) fn read_through<T, F>(
    cache: &dyn CacheBackend,
    key: &str,
    ttl: Duration,
    load: F,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<Option<T>>,
{
    match cache.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => {
                metrics::counter!("cache_hits_total").increment(1);
                return Ok(Some(value));
            },
            Err(e) => {
                // A corrupt entry is dropped and treated as a miss.
                tracing::warn!(key, error = %e, "evicting undecodable cache entry");
                let _ = cache.delete(key);
            },
        },
        Ok(None) => {
            metrics::counter!("cache_misses_total").increment(1);
        },
        Err(e) => {
            metrics::counter!("cache_errors_total").increment(1);
            tracing::warn!(key, error = %e, "cache read failed, falling through to storage");
        },
    }

    let loaded = load()?;
    if let Some(ref value) = loaded {
        populate(cache, key, value, ttl);
    }
    Ok(loaded)
}

/// Read-through for a list query. Lists cache as a whole value, empty
/// results included; an empty page is as valid an answer as a full one.
pub(crate) fn read_through_list<T, F>(
    cache: &dyn CacheBackend,
    key: &str,
    ttl: Duration,
    load: F,
) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<Vec<T>>,
{
    match cache.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(values) => {
                metrics::counter!("cache_hits_total").increment(1);
                return Ok(values);
            },
            Err(e) => {
                tracing::warn!(key, error = %e, "evicting undecodable cache entry");
                let _ = cache.delete(key);
            },
        },
        Ok(None) => {
            metrics::counter!("cache_misses_total").increment(1);
        },
        Err(e) => {
            metrics::counter!("cache_errors_total").increment(1);
            tracing::warn!(key, error = %e, "cache read failed, falling through to storage");
        },
    }

    let loaded = load()?;
    populate(cache, key, &loaded, ttl);
    Ok(loaded)
}

fn populate<T: Serialize>(cache: &dyn CacheBackend, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_string(value) {
        Ok(raw) => {
            if let Err(e) = cache.set(key, &raw, ttl) {
                metrics::counter!("cache_errors_total").increment(1);
                tracing::warn!(key, error = %e, "cache population failed");
            }
        },
        Err(e) => {
            tracing::warn!(key, error = %e, "cache value failed to serialize");
        },
    }
}

/// Drops exact keys after a successful storage write.
pub(crate) fn invalidate(cache: &dyn CacheBackend, keys: &[String]) {
    for key in keys {
        metrics::counter!("cache_invalidations_total").increment(1);
        if let Err(e) = cache.delete(key) {
            metrics::counter!("cache_errors_total").increment(1);
            tracing::warn!(key, error = %e, "cache invalidation failed");
        }
    }
}

/// Drops every key under the given prefixes (dependent list queries).
pub(crate) fn invalidate_prefixes(cache: &dyn CacheBackend, prefixes: &[String]) {
    for prefix in prefixes {
        metrics::counter!("cache_invalidations_total").increment(1);
        if let Err(e) = cache.delete_prefix(prefix) {
            metrics::counter!("cache_errors_total").increment(1);
            tracing::warn!(prefix, error = %e, "cache prefix invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::cache::{CacheError, CacheResult, InMemoryCache};

    /// Cache that fails every operation.
    struct BrokenCache;

    impl CacheBackend for BrokenCache {
        fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::unavailable("get", "wire cut"))
        }

        fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::unavailable("set", "wire cut"))
        }

        fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::unavailable("delete", "wire cut"))
        }

        fn delete_prefix(&self, _prefix: &str) -> CacheResult<()> {
            Err(CacheError::unavailable("delete_prefix", "wire cut"))
        }
    }

    #[test]
    fn test_read_through_populates_on_miss() {
        let cache = InMemoryCache::new(16);
        let value: Option<u32> =
            read_through(&cache, "k", Duration::from_secs(60), || Ok(Some(7))).unwrap();
        assert_eq!(value, Some(7));

        // Second read is served from the cache: a loader that would fail is
        // never invoked.
        let cached: Option<u32> = read_through(&cache, "k", Duration::from_secs(60), || {
            Err(crate::Error::storage("load", "should not be called"))
        })
        .unwrap();
        assert_eq!(cached, Some(7));
    }

    #[test]
    fn test_absence_is_not_cached() {
        let cache = InMemoryCache::new(16);
        let missing: Option<u32> =
            read_through(&cache, "k", Duration::from_secs(60), || Ok(None)).unwrap();
        assert_eq!(missing, None);

        // The entity appearing later is visible immediately.
        let found: Option<u32> =
            read_through(&cache, "k", Duration::from_secs(60), || Ok(Some(9))).unwrap();
        assert_eq!(found, Some(9));
    }

    #[test]
    fn test_broken_cache_degrades_to_storage() {
        let cache = BrokenCache;
        let value: Option<u32> =
            read_through(&cache, "k", Duration::from_secs(60), || Ok(Some(3))).unwrap();
        assert_eq!(value, Some(3));

        let list: Vec<u32> =
            read_through_list(&cache, "l", Duration::from_secs(60), || Ok(vec![1, 2])).unwrap();
        assert_eq!(list, vec![1, 2]);

        // Invalidation against a broken cache is a logged no-op.
        invalidate(&cache, &["k".to_string()]);
        invalidate_prefixes(&cache, &["l".to_string()]);
    }

    #[test]
    fn test_corrupt_entry_is_evicted_and_reloaded() {
        let cache = InMemoryCache::new(16);
        cache.set("k", "not json at all {{", Duration::from_secs(60)).unwrap();

        let value: Option<u32> =
            read_through(&cache, "k", Duration::from_secs(60), || Ok(Some(5))).unwrap();
        assert_eq!(value, Some(5));
    }

    #[test]
    fn test_empty_lists_are_cached() {
        let cache = InMemoryCache::new(16);
        let first: Vec<u32> =
            read_through_list(&cache, "l", Duration::from_secs(60), || Ok(Vec::new())).unwrap();
        assert!(first.is_empty());

        let second: Vec<u32> = read_through_list(&cache, "l", Duration::from_secs(60), || {
            Err(crate::Error::storage("load", "should not be called"))
        })
        .unwrap();
        assert!(second.is_empty());
    }
}

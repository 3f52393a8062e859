//! In-process bounded cache.
//!
//! The default cache when no Redis URL is configured: an LRU map with
//! per-entry expiry. Bounded capacity keeps the worst case at "old entries
//! evicted early", which costs reads, not correctness.

use super::{CacheBackend, CacheError, CacheResult};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default capacity when the configuration does not specify one.
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process cache with TTL semantics.
pub struct InMemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl InMemoryCache {
    /// Creates a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, LruCache<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|e| CacheError::unavailable("lock", e))
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CacheBackend for InMemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            // Expired: drop it so it stops occupying capacity.
            entries.pop(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.lock()?;
        entries.put(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        let mut entries = self.lock()?;
        entries.pop(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        let mut entries = self.lock()?;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            entries.pop(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_round_trip_and_delete() {
        let cache = InMemoryCache::new(16);
        cache.set("a", "1", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("a").unwrap().as_deref(), Some("1"));

        cache.delete("a").unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
    }

    #[test]
    fn test_entries_expire() {
        let cache = InMemoryCache::new(16);
        cache.set("a", "1", Duration::ZERO).unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
    }

    #[test]
    fn test_capacity_bound_evicts_lru() {
        let cache = InMemoryCache::new(2);
        cache.set("a", "1", Duration::from_secs(60)).unwrap();
        cache.set("b", "2", Duration::from_secs(60)).unwrap();
        cache.set("c", "3", Duration::from_secs(60)).unwrap();

        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_delete_prefix_spares_other_keys() {
        let cache = InMemoryCache::new(16);
        cache
            .set("msg:list:c1:aaa", "x", Duration::from_secs(60))
            .unwrap();
        cache
            .set("msg:list:c1:bbb", "y", Duration::from_secs(60))
            .unwrap();
        cache
            .set("msg:list:c2:ccc", "z", Duration::from_secs(60))
            .unwrap();

        cache.delete_prefix("msg:list:c1:").unwrap();

        assert_eq!(cache.get("msg:list:c1:aaa").unwrap(), None);
        assert_eq!(cache.get("msg:list:c1:bbb").unwrap(), None);
        assert_eq!(cache.get("msg:list:c2:ccc").unwrap().as_deref(), Some("z"));
    }
}

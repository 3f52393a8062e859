//! The `Store` container: configuration in, wired services out.
//!
//! Explicit composition, explicit lifecycle. `Store::open` builds the
//! storage backend, the pool (for the relational adapter), and the cache
//! from a [`StoreConfig`]; `Store::close` disposes the pool. Nothing here is
//! a process-wide singleton: construct one and pass it around.

use super::{
    ApiKeyService, ConversationService, MemoryService, MessageService, UploadService, UserService,
};
use crate::cache::{CacheBackend, InMemoryCache, NullCache};
use crate::config::StoreConfig;
use crate::storage::{ConnectionPool, DocumentBackend, SqliteBackend, StorageBackend};
use crate::{Error, Result};
use std::sync::Arc;

/// Top-level handle owning the backend, cache, and pool.
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    pool: Option<Arc<ConnectionPool>>,
    config: StoreConfig,
}

impl Store {
    /// Opens a store from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unrecognized URL scheme, or the
    /// backend's error if it cannot be opened.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let (backend, pool) = open_backend(&config)?;
        let cache = open_cache(&config)?;
        tracing::info!(
            storage = %config.storage_url,
            cache = %config.cache_url,
            "store opened"
        );
        Ok(Self {
            backend,
            cache,
            pool,
            config,
        })
    }

    /// Opens a store from the environment (`CONVOSTORE_*`).
    ///
    /// # Errors
    ///
    /// Same conditions as [`Store::open`].
    pub fn open_from_env() -> Result<Self> {
        Self::open(StoreConfig::from_env())
    }

    /// An in-memory store with an in-process cache, for tests and demos.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let mut config = StoreConfig::default();
        config.storage_url = "sqlite::memory:".to_string();
        Self::open(config)
    }

    /// User operations.
    #[must_use]
    pub fn users(&self) -> UserService {
        UserService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
            self.config.ttl.users(),
        )
    }

    /// Conversation operations.
    #[must_use]
    pub fn conversations(&self) -> ConversationService {
        ConversationService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
            self.config.ttl.conversations(),
        )
    }

    /// Message operations.
    #[must_use]
    pub fn messages(&self) -> MessageService {
        MessageService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
            self.config.ttl.messages(),
        )
    }

    /// Memory-fact operations.
    #[must_use]
    pub fn memories(&self) -> MemoryService {
        MemoryService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
            self.config.ttl.memories(),
        )
    }

    /// Uploaded-file operations.
    #[must_use]
    pub fn uploads(&self) -> UploadService {
        UploadService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
            self.config.ttl.uploads(),
        )
    }

    /// API key operations.
    #[must_use]
    pub fn api_keys(&self) -> ApiKeyService {
        ApiKeyService::new(Arc::clone(&self.backend))
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Disposes the connection pool. Further sessions fail; existing ones
    /// finish and their connections are dropped on return.
    pub fn close(&self) {
        if let Some(ref pool) = self.pool {
            pool.close();
        }
        tracing::info!("store closed");
    }
}

fn open_backend(config: &StoreConfig) -> Result<(Arc<dyn StorageBackend>, Option<Arc<ConnectionPool>>)> {
    let url = config.storage_url.as_str();

    if url == "sqlite::memory:" {
        let backend = SqliteBackend::in_memory()?;
        let pool = Arc::clone(backend.pool());
        return Ok((Arc::new(backend), Some(pool)));
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        let backend = SqliteBackend::open_file(strip_extra_slash(path), config.pool.to_pool_config())?;
        let pool = Arc::clone(backend.pool());
        return Ok((Arc::new(backend), Some(pool)));
    }
    if let Some(path) = url.strip_prefix("file://") {
        let backend = DocumentBackend::open(strip_extra_slash(path))?;
        return Ok((Arc::new(backend), None));
    }

    Err(Error::Config(format!(
        "unrecognized storage URL {url:?} (expected sqlite://, sqlite::memory:, or file://)"
    )))
}

/// `scheme:///abs/path` keeps its absolute path; `scheme://rel/path` stays
/// relative.
fn strip_extra_slash(path: &str) -> &str {
    if let Some(rest) = path.strip_prefix('/')
        && rest.starts_with('/')
    {
        return rest;
    }
    path
}

fn open_cache(config: &StoreConfig) -> Result<Arc<dyn CacheBackend>> {
    let url = config.cache_url.as_str();

    if url.starts_with("memory://") || url.is_empty() {
        return Ok(Arc::new(InMemoryCache::new(config.cache_capacity)));
    }
    if url.starts_with("none://") {
        return Ok(Arc::new(NullCache));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            return match crate::cache::RedisCache::connect(url) {
                Ok(cache) => Ok(Arc::new(cache)),
                Err(e) => {
                    // A cache that cannot even be constructed degrades the
                    // same way a dead one does: fall back, keep serving.
                    tracing::warn!(error = %e, "redis cache unavailable, using in-process cache");
                    Ok(Arc::new(InMemoryCache::new(config.cache_capacity)))
                },
            };
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "cache URL {url:?} requires the 'redis' feature; using in-process cache"
            );
            return Ok(Arc::new(InMemoryCache::new(config.cache_capacity)));
        }
    }

    Err(Error::Config(format!(
        "unrecognized cache URL {url:?} (expected memory://, none://, or redis://)"
    )))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_unknown_schemes_are_config_errors() {
        let mut config = StoreConfig::default();
        config.storage_url = "postgres://localhost/db".to_string();
        assert!(matches!(Store::open(config), Err(Error::Config(_))));

        let mut config = StoreConfig::default();
        config.storage_url = "sqlite::memory:".to_string();
        config.cache_url = "memcached://localhost".to_string();
        assert!(matches!(Store::open(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_strip_extra_slash() {
        assert_eq!(strip_extra_slash("/var/lib/db.sqlite"), "/var/lib/db.sqlite");
        assert_eq!(strip_extra_slash("//var/lib/db.sqlite"), "/var/lib/db.sqlite");
        assert_eq!(strip_extra_slash("./db.sqlite"), "./db.sqlite");
    }

    #[test]
    fn test_in_memory_store_opens() {
        let store = Store::in_memory().unwrap();
        let user = store.users().register("ada", None, None).unwrap();
        assert_eq!(store.users().get(&user.id).unwrap().unwrap().username, "ada");
        store.close();
    }
}

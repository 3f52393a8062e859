//! Configuration management.
//!
//! Environment-first (`CONVOSTORE_*` variables, `.env` honored via dotenvy)
//! with an optional TOML file underneath. URLs select the backends:
//!
//! - storage: `sqlite:///path/to.db`, `sqlite::memory:`, `file:///data/dir`
//! - cache: `memory://` (default), `redis://host:port`, `none://`

use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix shared by every setting.
const ENV_PREFIX: &str = "CONVOSTORE_";

/// Main configuration for convostore.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Storage backend URL.
    pub storage_url: String,
    /// Cache backend URL.
    pub cache_url: String,
    /// Entry bound for the in-process cache.
    pub cache_capacity: usize,
    /// Connection pool tunables (relational backend only).
    pub pool: PoolSettings,
    /// Per-entity cache TTLs.
    pub ttl: TtlSettings,
}

/// Connection pool tunables.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Resident connections.
    pub size: usize,
    /// Additional transient connections under load.
    pub max_overflow: usize,
    /// Checkout timeout in seconds.
    pub checkout_timeout_secs: u64,
    /// Connection recycle age in seconds. Zero disables recycling.
    pub recycle_secs: u64,
    /// Whether to probe liveness before handing a connection out.
    pub pre_ping: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 20,
            max_overflow: 30,
            checkout_timeout_secs: 10,
            recycle_secs: 1800,
            pre_ping: true,
        }
    }
}

impl PoolSettings {
    /// Converts into the pool's runtime configuration.
    #[must_use]
    pub fn to_pool_config(&self) -> crate::storage::PoolConfig {
        crate::storage::PoolConfig {
            max_size: self.size.max(1),
            max_overflow: self.max_overflow,
            checkout_timeout: Duration::from_secs(self.checkout_timeout_secs),
            recycle_after: (self.recycle_secs > 0)
                .then(|| Duration::from_secs(self.recycle_secs)),
            pre_ping: self.pre_ping,
        }
    }
}

/// Per-entity cache TTLs, in seconds.
#[derive(Debug, Clone)]
pub struct TtlSettings {
    /// Users (and username lookups).
    pub users_secs: u64,
    /// Conversations and conversation lists.
    pub conversations_secs: u64,
    /// Messages and message lists.
    pub messages_secs: u64,
    /// Memory facts and memory lists.
    pub memories_secs: u64,
    /// Uploaded-file metadata.
    pub uploads_secs: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            users_secs: 3600,
            conversations_secs: 1800,
            messages_secs: 900,
            memories_secs: 1800,
            uploads_secs: 1800,
        }
    }
}

impl TtlSettings {
    /// TTL for user entries.
    #[must_use]
    pub const fn users(&self) -> Duration {
        Duration::from_secs(self.users_secs)
    }

    /// TTL for conversation entries.
    #[must_use]
    pub const fn conversations(&self) -> Duration {
        Duration::from_secs(self.conversations_secs)
    }

    /// TTL for message entries.
    #[must_use]
    pub const fn messages(&self) -> Duration {
        Duration::from_secs(self.messages_secs)
    }

    /// TTL for memory entries.
    #[must_use]
    pub const fn memories(&self) -> Duration {
        Duration::from_secs(self.memories_secs)
    }

    /// TTL for upload entries.
    #[must_use]
    pub const fn uploads(&self) -> Duration {
        Duration::from_secs(self.uploads_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_url: "sqlite://./convostore.db".to_string(),
            cache_url: "memory://".to_string(),
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
            pool: PoolSettings::default(),
            ttl: TtlSettings::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Storage backend URL.
    pub storage_url: Option<String>,
    /// Cache backend URL.
    pub cache_url: Option<String>,
    /// In-process cache capacity.
    pub cache_capacity: Option<usize>,
    /// Pool section.
    pub pool: Option<ConfigFilePool>,
    /// TTL section.
    pub ttl: Option<ConfigFileTtl>,
}

/// Pool section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePool {
    /// Resident connections.
    pub size: Option<usize>,
    /// Overflow connections.
    pub max_overflow: Option<usize>,
    /// Checkout timeout, seconds.
    pub checkout_timeout_secs: Option<u64>,
    /// Recycle age, seconds.
    pub recycle_secs: Option<u64>,
    /// Pre-ping toggle.
    pub pre_ping: Option<bool>,
}

/// TTL section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTtl {
    /// Users TTL, seconds.
    pub users_secs: Option<u64>,
    /// Conversations TTL, seconds.
    pub conversations_secs: Option<u64>,
    /// Messages TTL, seconds.
    pub messages_secs: Option<u64>,
    /// Memories TTL, seconds.
    pub memories_secs: Option<u64>,
    /// Uploads TTL, seconds.
    pub uploads_secs: Option<u64>,
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: ConfigFile = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        Ok(Self::from_config_file(file))
    }

    /// Builds configuration from the environment, starting from defaults.
    ///
    /// `.env` files are honored. Unset variables keep their defaults;
    /// malformed numeric values are ignored with a warning rather than
    /// failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(url) = std::env::var(format!("{ENV_PREFIX}STORAGE_URL")) {
            config.storage_url = url;
        }
        if let Ok(url) = std::env::var(format!("{ENV_PREFIX}CACHE_URL")) {
            config.cache_url = url;
        }
        if let Some(capacity) = env_parse(&format!("{ENV_PREFIX}CACHE_CAPACITY")) {
            config.cache_capacity = capacity;
        }

        if let Some(size) = env_parse(&format!("{ENV_PREFIX}POOL_SIZE")) {
            config.pool.size = size;
        }
        if let Some(overflow) = env_parse(&format!("{ENV_PREFIX}POOL_MAX_OVERFLOW")) {
            config.pool.max_overflow = overflow;
        }
        if let Some(timeout) = env_parse(&format!("{ENV_PREFIX}POOL_CHECKOUT_TIMEOUT_SECS")) {
            config.pool.checkout_timeout_secs = timeout;
        }
        if let Some(recycle) = env_parse(&format!("{ENV_PREFIX}POOL_RECYCLE_SECS")) {
            config.pool.recycle_secs = recycle;
        }
        if let Some(pre_ping) = env_parse(&format!("{ENV_PREFIX}POOL_PRE_PING")) {
            config.pool.pre_ping = pre_ping;
        }

        if let Some(secs) = env_parse(&format!("{ENV_PREFIX}TTL_USERS_SECS")) {
            config.ttl.users_secs = secs;
        }
        if let Some(secs) = env_parse(&format!("{ENV_PREFIX}TTL_CONVERSATIONS_SECS")) {
            config.ttl.conversations_secs = secs;
        }
        if let Some(secs) = env_parse(&format!("{ENV_PREFIX}TTL_MESSAGES_SECS")) {
            config.ttl.messages_secs = secs;
        }
        if let Some(secs) = env_parse(&format!("{ENV_PREFIX}TTL_MEMORIES_SECS")) {
            config.ttl.memories_secs = secs;
        }
        if let Some(secs) = env_parse(&format!("{ENV_PREFIX}TTL_UPLOADS_SECS")) {
            config.ttl.uploads_secs = secs;
        }

        config
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();
        if let Some(url) = file.storage_url {
            config.storage_url = url;
        }
        if let Some(url) = file.cache_url {
            config.cache_url = url;
        }
        if let Some(capacity) = file.cache_capacity {
            config.cache_capacity = capacity;
        }

        if let Some(pool) = file.pool {
            if let Some(size) = pool.size {
                config.pool.size = size;
            }
            if let Some(overflow) = pool.max_overflow {
                config.pool.max_overflow = overflow;
            }
            if let Some(timeout) = pool.checkout_timeout_secs {
                config.pool.checkout_timeout_secs = timeout;
            }
            if let Some(recycle) = pool.recycle_secs {
                config.pool.recycle_secs = recycle;
            }
            if let Some(pre_ping) = pool.pre_ping {
                config.pool.pre_ping = pre_ping;
            }
        }

        if let Some(ttl) = file.ttl {
            if let Some(secs) = ttl.users_secs {
                config.ttl.users_secs = secs;
            }
            if let Some(secs) = ttl.conversations_secs {
                config.ttl.conversations_secs = secs;
            }
            if let Some(secs) = ttl.messages_secs {
                config.ttl.messages_secs = secs;
            }
            if let Some(secs) = ttl.memories_secs {
                config.ttl.memories_secs = secs;
            }
            if let Some(secs) = ttl.uploads_secs {
                config.ttl.uploads_secs = secs;
            }
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "ignoring malformed value");
                None
            },
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.pool.size, 20);
        assert_eq!(config.pool.max_overflow, 30);
        assert_eq!(config.pool.recycle_secs, 1800);
        assert_eq!(config.ttl.users_secs, 3600);
        assert_eq!(config.ttl.conversations_secs, 1800);
        assert_eq!(config.cache_url, "memory://");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convostore.toml");
        std::fs::write(
            &path,
            r#"
storage_url = "sqlite:///var/lib/convostore.db"
cache_url = "none://"

[pool]
size = 5
recycle_secs = 0

[ttl]
messages_secs = 60
"#,
        )
        .unwrap();

        let config = StoreConfig::load_from_file(&path).unwrap();
        assert_eq!(config.storage_url, "sqlite:///var/lib/convostore.db");
        assert_eq!(config.cache_url, "none://");
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.ttl.messages_secs, 60);
        // recycle_secs = 0 disables recycling entirely.
        assert!(config.pool.to_pool_config().recycle_after.is_none());
        // Untouched sections keep their defaults.
        assert_eq!(config.pool.max_overflow, 30);
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "storage_url = [not toml").unwrap();
        assert!(matches!(
            StoreConfig::load_from_file(&path),
            Err(Error::Config(_))
        ));
    }
}

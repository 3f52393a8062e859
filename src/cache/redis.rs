//! Redis cache backend.
//!
//! Enabled with the `redis` cargo feature. Maintains one reusable connection
//! behind a mutex: taken for each command, returned afterwards, recreated on
//! failure. Commands carry a response timeout so a stalled server degrades
//! into a cache miss instead of a hung request.

use super::{CacheBackend, CacheError, CacheResult};
use redis::{Client, Commands, Connection};
use std::sync::Mutex;
use std::time::Duration;

/// Response timeout for Redis commands.
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Batch size for SCAN-based prefix deletion.
const SCAN_COUNT: usize = 200;

/// Redis-backed cache.
pub struct RedisCache {
    client: Client,
    /// Cached connection for reuse across commands.
    connection: Mutex<Option<Connection>>,
}

impl RedisCache {
    /// Connects to the given Redis URL (e.g. `redis://localhost:6379`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed. The first network round
    /// trip happens lazily on the first command.
    pub fn connect(url: &str) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| CacheError::unavailable("redis_open", e))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    /// Takes the cached connection, or opens a fresh one with timeouts set.
    fn take_connection(&self) -> CacheResult<Connection> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|e| CacheError::unavailable("redis_lock", e))?;
        if let Some(conn) = guard.take() {
            return Ok(conn);
        }
        drop(guard);

        let conn = self
            .client
            .get_connection()
            .map_err(|e| CacheError::unavailable("redis_connect", e))?;
        conn.set_read_timeout(Some(REDIS_TIMEOUT))
            .map_err(|e| CacheError::unavailable("redis_set_read_timeout", e))?;
        conn.set_write_timeout(Some(REDIS_TIMEOUT))
            .map_err(|e| CacheError::unavailable("redis_set_write_timeout", e))?;
        Ok(conn)
    }

    /// Returns a healthy connection for reuse. Broken connections are simply
    /// dropped; the next command reconnects.
    fn return_connection(&self, conn: Connection) {
        if let Ok(mut guard) = self.connection.lock() {
            *guard = Some(conn);
        }
    }
}

impl CacheBackend for RedisCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.take_connection()?;
        let result: redis::RedisResult<Option<String>> = conn.get(key);
        match result {
            Ok(value) => {
                self.return_connection(conn);
                Ok(value)
            },
            Err(e) => Err(CacheError::unavailable("redis_get", e)),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.take_connection()?;
        let seconds = ttl.as_secs().max(1);
        let result: redis::RedisResult<()> = conn.set_ex(key, value, seconds);
        match result {
            Ok(()) => {
                self.return_connection(conn);
                Ok(())
            },
            Err(e) => Err(CacheError::unavailable("redis_set", e)),
        }
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.take_connection()?;
        let result: redis::RedisResult<()> = conn.del(key);
        match result {
            Ok(()) => {
                self.return_connection(conn);
                Ok(())
            },
            Err(e) => Err(CacheError::unavailable("redis_del", e)),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        let mut conn = self.take_connection()?;
        let pattern = format!("{prefix}*");

        // SCAN instead of KEYS: bounded batches, no full keyspace stall.
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = match redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query(&mut conn)
            {
                Ok(reply) => reply,
                Err(e) => return Err(CacheError::unavailable("redis_scan", e)),
            };

            if !batch.is_empty()
                && let Err(e) = conn.del::<_, ()>(&batch)
            {
                return Err(CacheError::unavailable("redis_del_batch", e));
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        self.return_connection(conn);
        Ok(())
    }
}

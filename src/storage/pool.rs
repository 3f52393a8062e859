//! Pooled connection and session management for the `SQLite` backend.
//!
//! The pool hands out connections through scoped [`Session`]s:
//!
//! - **closed → open (scoped) → committed | rolled-back → closed**
//!
//! A session's transaction commits when the scoped closure returns `Ok`,
//! rolls back (and re-raises) when it returns `Err`, and the underlying
//! connection always goes back to the pool when the session drops.
//!
//! Pool behavior:
//!
//! - `max_size` resident connections are parked when idle and reused
//! - up to `max_overflow` transient connections are opened under load and
//!   closed on return instead of parked
//! - checkout waits up to `checkout_timeout`, then fails with
//!   [`Error::PoolTimeout`]
//! - connections older than `recycle_after` are discarded at checkout
//! - an optional pre-ping (`SELECT 1`) discards dead connections before they
//!   reach a caller

use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Where the `SQLite` database lives.
#[derive(Debug, Clone)]
pub enum SqliteLocation {
    /// On-disk database file.
    File(PathBuf),
    /// Shared-cache in-memory database. All pool connections see the same
    /// data as long as at least one connection stays open; the pool keeps an
    /// eagerly opened connection around for exactly that reason.
    Memory {
        /// URI name distinguishing independent in-memory databases.
        name: String,
    },
}

impl SqliteLocation {
    /// A fresh in-memory location with a unique name.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory {
            name: format!("convostore-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = match self {
            Self::File(path) => Connection::open(path),
            Self::Memory { name } => Connection::open_with_flags(
                format!("file:{name}?mode=memory&cache=shared"),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            ),
        }
        .map_err(|e| Error::storage("open_connection", e))?;

        configure_connection(&conn)?;
        Ok(conn)
    }
}

/// Tunables for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Resident connections kept alive across checkouts.
    pub max_size: usize,
    /// Additional transient connections allowed under load.
    pub max_overflow: usize,
    /// How long a checkout may wait before failing.
    pub checkout_timeout: Duration,
    /// Age at which a connection is discarded instead of reused. `None`
    /// disables recycling (required for in-memory databases, where dropping
    /// the last connection drops the data).
    pub recycle_after: Option<Duration>,
    /// Whether to probe liveness (`SELECT 1`) before handing a connection out.
    pub pre_ping: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 20,
            max_overflow: 30,
            checkout_timeout: Duration::from_secs(10),
            recycle_after: Some(Duration::from_secs(1800)),
            pre_ping: true,
        }
    }
}

impl PoolConfig {
    /// Configuration for a single-connection pool, used for in-memory
    /// databases where every connection must share one cache.
    #[must_use]
    pub const fn single(checkout_timeout: Duration) -> Self {
        Self {
            max_size: 1,
            max_overflow: 0,
            checkout_timeout,
            recycle_after: None,
            pre_ping: false,
        }
    }
}

/// Applies the standard pragmas to a fresh connection.
///
/// - **WAL mode** for concurrent readers alongside a single writer
/// - **NORMAL synchronous** balancing durability with performance
/// - **`busy_timeout`** so lock contention waits instead of failing
/// - **`foreign_keys`** so conversation deletes cascade to owned rows
fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a string result; in-memory databases report
    // "memory" instead of "wal", which is fine.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::storage("enable_foreign_keys", e))?;
    Ok(())
}

/// Acquires a mutex guard, recovering from poisoning.
///
/// A panic in a previous critical section poisons the mutex; the pool state
/// is still structurally valid, so recover it rather than cascading the
/// failure to every subsequent caller.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("connection pool mutex was poisoned, recovering");
            metrics::counter!("pool_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

struct IdleConn {
    conn: Connection,
    opened_at: Instant,
}

struct PoolState {
    idle: Vec<IdleConn>,
    /// Connections currently alive: idle + checked out, resident + overflow.
    open_count: usize,
    closed: bool,
}

/// Bounded connection pool for the `SQLite` backend.
///
/// Explicitly constructed and injected; there is no process-wide singleton.
/// Call [`ConnectionPool::close`] on shutdown to drain idle connections.
pub struct ConnectionPool {
    location: SqliteLocation,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    recycled: AtomicU64,
    timeouts: AtomicU64,
}

impl ConnectionPool {
    /// Opens a pool against the given location.
    ///
    /// One connection is opened eagerly: it validates the location up front
    /// and anchors shared-cache in-memory databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection cannot be opened.
    pub fn open(location: SqliteLocation, config: PoolConfig) -> Result<Arc<Self>> {
        let initial = location.open()?;
        let state = PoolState {
            idle: vec![IdleConn {
                conn: initial,
                opened_at: Instant::now(),
            }],
            open_count: 1,
            closed: false,
        };

        Ok(Arc::new(Self {
            location,
            config,
            state: Mutex::new(state),
            available: Condvar::new(),
            recycled: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }))
    }

    /// Checks a connection out into a scoped [`Session`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolTimeout`] when the pool stays exhausted past the
    /// checkout timeout, or [`Error::Storage`] if the pool is closed or a
    /// replacement connection cannot be opened.
    pub fn session(self: &Arc<Self>) -> Result<Session> {
        let (conn, opened_at, overflow) = self.checkout()?;
        metrics::counter!("pool_checkouts_total").increment(1);
        Ok(Session {
            pool: Arc::clone(self),
            leased: Some(Leased {
                conn,
                opened_at,
                overflow,
            }),
        })
    }

    /// Closes the pool: drops all idle connections and refuses new sessions.
    ///
    /// Sessions already checked out finish normally; their connections are
    /// dropped on return.
    pub fn close(&self) {
        let mut state = acquire_lock(&self.state);
        state.closed = true;
        let drained = state.idle.drain(..).count();
        state.open_count = state.open_count.saturating_sub(drained);
        drop(state);
        self.available.notify_all();
    }

    /// Number of connections recycled due to age or a failed pre-ping.
    #[must_use]
    pub fn recycled_count(&self) -> u64 {
        self.recycled.load(Ordering::Relaxed)
    }

    /// Number of checkouts that failed with a timeout.
    #[must_use]
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Idle connections currently parked.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        acquire_lock(&self.state).idle.len()
    }

    fn checkout(&self) -> Result<(Connection, Instant, bool)> {
        let start = Instant::now();
        let mut state = acquire_lock(&self.state);

        loop {
            if state.closed {
                return Err(Error::storage("checkout", "pool is closed"));
            }

            // Reuse an idle connection, discarding stale or dead ones.
            while let Some(idle) = state.idle.pop() {
                if self
                    .config
                    .recycle_after
                    .is_some_and(|max_age| idle.opened_at.elapsed() > max_age)
                {
                    state.open_count -= 1;
                    self.recycled.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("pool_connections_recycled_total").increment(1);
                    continue;
                }
                if self.config.pre_ping && !ping(&idle.conn) {
                    state.open_count -= 1;
                    self.recycled.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("pool_pre_ping_failures_total").increment(1);
                    tracing::warn!("discarding dead pooled connection");
                    continue;
                }
                return Ok((idle.conn, idle.opened_at, false));
            }

            // Open a new connection if the pool still has headroom.
            if state.open_count < self.config.max_size {
                state.open_count += 1;
                return match self.location.open() {
                    Ok(conn) => Ok((conn, Instant::now(), false)),
                    Err(e) => {
                        state.open_count -= 1;
                        Err(e)
                    },
                };
            }
            if state.open_count < self.config.max_size + self.config.max_overflow {
                state.open_count += 1;
                return match self.location.open() {
                    Ok(conn) => Ok((conn, Instant::now(), true)),
                    Err(e) => {
                        state.open_count -= 1;
                        Err(e)
                    },
                };
            }

            // Saturated: wait for a return, bounded by the checkout timeout.
            let waited = start.elapsed();
            if waited >= self.config.checkout_timeout {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pool_checkout_timeouts_total").increment(1);
                return Err(Error::PoolTimeout {
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let remaining = self.config.checkout_timeout - waited;
            let (guard, _timeout) = self
                .available
                .wait_timeout(state, remaining)
                .map_err(|_| Error::storage("checkout_wait", "pool mutex poisoned"))?;
            state = guard;
        }
    }

    fn checkin(&self, leased: Leased) {
        let mut state = acquire_lock(&self.state);
        if state.closed || leased.overflow {
            state.open_count = state.open_count.saturating_sub(1);
        } else {
            state.idle.push(IdleConn {
                conn: leased.conn,
                opened_at: leased.opened_at,
            });
        }
        drop(state);
        self.available.notify_one();
    }
}

fn ping(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .is_ok()
}

struct Leased {
    conn: Connection,
    opened_at: Instant,
    overflow: bool,
}

/// A scoped lease on a pooled connection.
///
/// Dropping the session always returns the connection to the pool (or closes
/// it, for overflow leases), whether or not the work inside succeeded.
pub struct Session {
    pool: Arc<ConnectionPool>,
    leased: Option<Leased>,
}

impl Session {
    /// Runs read-only or single-statement work in autocommit mode.
    ///
    /// # Errors
    ///
    /// Propagates whatever the closure returns.
    pub fn run<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(self.connection())
    }

    /// Runs the closure inside `BEGIN IMMEDIATE … COMMIT`.
    ///
    /// Commits when the closure returns `Ok`; rolls back and propagates the
    /// error otherwise. A failed rollback is logged, not raised; the
    /// original error is the one the caller needs.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error, or [`Error::Storage`] if the
    /// transaction bookkeeping itself fails.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connection();
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::storage("begin_transaction", e))?;

        match f(conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| Error::storage("commit_transaction", e))?;
                Ok(value)
            },
            Err(e) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback_err, "rollback failed after error");
                }
                Err(e)
            },
        }
    }

    fn connection(&self) -> &Connection {
        // Invariant: `leased` is Some for the session's whole lifetime; it is
        // only taken in Drop.
        match self.leased {
            Some(ref leased) => &leased.conn,
            None => unreachable!("session used after drop"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(leased) = self.leased.take() {
            self.pool.checkin(leased);
        }
    }
}

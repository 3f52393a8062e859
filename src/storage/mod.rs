//! Storage layer abstraction.
//!
//! One repository contract ([`StorageBackend`]) with two swappable adapters:
//!
//! - **`SQLite`**: the relational adapter, running on the pooled connection
//!   manager in [`pool`]
//! - **Document**: a JSON-file document store, one file per entity
//!
//! Backends are the system of record. The cache layer sits above them and is
//! populated/invalidated by the services; nothing in this module touches the
//! cache.
//!
//! Failure semantics: absence is `Ok(None)`/`Ok(false)`, never an error, and
//! storage failures are always surfaced as [`crate::Error::Storage`], so the
//! two are deliberately distinguishable at this boundary.

// Allow significant_drop_tightening - dropping connection guards slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod document;
pub mod pool;
pub mod sqlite;
mod traits;

pub use document::DocumentBackend;
pub use pool::{ConnectionPool, PoolConfig, Session, SqliteLocation};
pub use sqlite::SqliteBackend;
pub use traits::{
    ApiKeyStore, ConversationStore, MemoryStore, MessageStore, StorageBackend, UploadStore,
    UserStore,
};

/// Fixed chunk size for bulk message inserts.
///
/// Bounds per-call payload size only; a failure mid-way leaves earlier chunks
/// applied (no cross-chunk atomicity).
pub const BULK_CHUNK_SIZE: usize = 1000;

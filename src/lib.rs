//! # Convostore
//!
//! A cache-aside persistence layer for AI assistant conversation history.
//!
//! Convostore stores users, conversations, messages, learned memory facts,
//! uploaded-file metadata, and API keys behind a single repository contract,
//! with a read-through cache in front and a pooled connection manager below.
//!
//! ## Architecture
//!
//! - **Storage backends**: one repository contract ([`storage::StorageBackend`])
//!   with two swappable adapters: relational `SQLite` and a JSON document store
//! - **Cache-aside services**: read-through population on miss, synchronous
//!   invalidation (delete, not update) after every write
//! - **Session manager**: bounded connection pool with overflow, checkout
//!   timeout, liveness pre-ping, and age-based recycling
//!
//! The cache is never the system of record: every cached value can be
//! re-derived from storage, and a failing cache degrades latency, not
//! correctness.
//!
//! ## Example
//!
//! ```rust,ignore
//! use convostore::{Role, Store, StoreConfig};
//!
//! let store = Store::open(StoreConfig::default())?;
//! let user = store.users().register("ada", None, Some("Ada Lovelace"))?;
//! let conv = store.conversations().start(&user.id, "Test", &[])?;
//! store.messages().append(&conv.id, Role::User, "Hi", None)?;
//! store.close();
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod config;
pub mod models;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{PoolSettings, StoreConfig, TtlSettings};
pub use models::{
    ApiKey, Conversation, ConversationFilter, ConversationId, MemoryFact, MemoryId, Message,
    MessageId, Page, Role, UploadedFile, User, UserId,
};
pub use services::{
    ApiKeyService, ConversationService, MemoryService, MessageService, Store, UploadService,
    UserService,
};
pub use storage::{ConnectionPool, Session, StorageBackend};

/// Error type for convostore operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// Absence is never an error: repository lookups return `Ok(None)` when an
/// entity does not exist, so callers can always tell "not found" apart from
/// "storage failed" (`Storage`). Cache failures never surface here at all;
/// the service layer logs them and falls through to storage.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Caller-supplied fields fail validation before reaching storage |
/// | `Conflict` | Uniqueness violation (duplicate username, email, sequence number) |
/// | `Storage` | Database/filesystem operations fail |
/// | `PoolTimeout` | Connection checkout exceeds the configured timeout |
/// | `Config` | Malformed configuration file or storage/cache URL |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Required fields are empty (username, message content, memory question)
    /// - A pagination limit of zero is requested
    /// - An identifier contains characters unsafe for the document backend
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A uniqueness constraint was violated.
    ///
    /// Raised when:
    /// - Creating a user with an existing username or email
    /// - Inserting a message with an explicit, already-taken sequence number
    #[error("conflict on {field}: {value:?} already exists")]
    Conflict {
        /// The constrained field.
        field: String,
        /// The conflicting value.
        value: String,
    },

    /// A storage operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail to prepare or execute
    /// - Document files cannot be read, written, or parsed
    /// - A stored record fails to round-trip through serde
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Connection checkout timed out.
    ///
    /// Raised when the pool is at capacity (resident + overflow) and no
    /// connection is returned within the configured checkout timeout.
    #[error("connection checkout timed out after {waited_ms}ms")]
    PoolTimeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// Configuration was invalid.
    ///
    /// Raised when:
    /// - The config file cannot be read or parsed
    /// - A storage or cache URL has an unrecognized scheme
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds an [`Error::Storage`] from an operation name and any displayable cause.
    pub(crate) fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for convostore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("username is empty".to_string());
        assert_eq!(err.to_string(), "invalid input: username is empty");

        let err = Error::Conflict {
            field: "username".to_string(),
            value: "ada".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "conflict on username: \"ada\" already exists"
        );

        let err = Error::storage("get_user", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "storage operation 'get_user' failed: disk I/O error"
        );

        let err = Error::PoolTimeout { waited_ms: 10_000 };
        assert_eq!(
            err.to_string(),
            "connection checkout timed out after 10000ms"
        );
    }
}

//! Schema initialization for the `SQLite` backend.
//!
//! Tables mirror the entity shapes in [`crate::models`]. Conversation-owned
//! rows (messages, memories, uploaded files) carry `ON DELETE CASCADE`
//! foreign keys so a conversation delete takes its children with it; user
//! ownership is tracked by indexed columns only, since user deletion is a
//! soft delete in the normal path.

use crate::{Error, Result};
use rusqlite::Connection;

/// Creates all tables and indexes. Idempotent.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT UNIQUE,
            full_name TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_admin INTEGER NOT NULL DEFAULT 0,
            last_login TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            is_archived INTEGER NOT NULL DEFAULT 0,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            message_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL
                REFERENCES conversations(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            model TEXT,
            sequence_number INTEGER NOT NULL,
            is_edited INTEGER NOT NULL DEFAULT 0,
            edit_history TEXT NOT NULL DEFAULT '[]',
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (conversation_id, sequence_number)
        );

        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conversation_id TEXT
                REFERENCES conversations(id) ON DELETE CASCADE,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            importance REAL NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS uploaded_files (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL
                REFERENCES conversations(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            is_processed INTEGER NOT NULL DEFAULT 0,
            analysis_result TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            label TEXT NOT NULL,
            prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            last_used_at TEXT,
            revoked_at TEXT,
            created_at TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::storage("create_tables", e))?;

    create_indexes(conn);
    Ok(())
}

/// Creates indexes for the common query patterns.
fn create_indexes(conn: &Connection) {
    // Conversation listings are per-user, ordered by recency.
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
         ON conversations(user_id, updated_at DESC)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_conversations_user_created
         ON conversations(user_id, created_at DESC)",
        [],
    );

    // Message listings walk a conversation in sequence order; the UNIQUE
    // constraint on (conversation_id, sequence_number) already provides the
    // covering index for that.
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
         ON messages(conversation_id, created_at DESC)",
        [],
    );

    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_user_created
         ON memories(user_id, created_at DESC)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_user_importance
         ON memories(user_id, importance DESC)",
        [],
    );

    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uploads_user_created
         ON uploaded_files(user_id, created_at DESC)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_uploads_conversation
         ON uploaded_files(conversation_id, created_at DESC)",
        [],
    );

    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_api_keys_user
         ON api_keys(user_id, created_at DESC)",
        [],
    );
}

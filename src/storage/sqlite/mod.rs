//! `SQLite`-based storage backend.
//!
//! The relational adapter and the default system of record. All access goes
//! through the pooled session manager: single statements run in autocommit
//! via [`Session::run`], multi-statement writes (append + recount, cascade
//! deletes, read-modify-write updates) run inside `BEGIN IMMEDIATE`
//! transactions via [`Session::transaction`].

mod rows;
mod schema;

use crate::models::{
    ApiKey, ApiKeyId, Conversation, ConversationFilter, ConversationId, ConversationPatch, FileId,
    MemoryFact, MemoryId, MemoryPatch, Message, MessageId, NewApiKey, NewConversation, NewMemory,
    NewMessage, NewUpload, NewUser, Page, UploadedFile, User, UserId, UserPatch,
};
use crate::storage::pool::{ConnectionPool, PoolConfig, Session, SqliteLocation};
use crate::storage::traits::{
    ApiKeyStore, ConversationStore, MemoryStore, MessageStore, UploadStore, UserStore,
};
use crate::storage::BULK_CHUNK_SIZE;
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use rows::{
    API_KEY_COLUMNS, CONVERSATION_COLUMNS, MEMORY_COLUMNS, MESSAGE_COLUMNS, UPLOAD_COLUMNS,
    USER_COLUMNS, api_key_from_row, conversation_from_row, join_tags, memory_from_row,
    message_from_row, upload_from_row, user_from_row,
};

/// `SQLite` storage backend running on a pooled connection manager.
pub struct SqliteBackend {
    pool: Arc<ConnectionPool>,
}

impl SqliteBackend {
    /// Creates a backend on an existing pool and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub fn new(pool: Arc<ConnectionPool>) -> Result<Self> {
        let backend = Self { pool };
        backend.session()?.run(schema::initialize)?;
        Ok(backend)
    }

    /// Opens a file-backed database with the given pool configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open_file(path: impl Into<PathBuf>, config: PoolConfig) -> Result<Self> {
        let pool = ConnectionPool::open(SqliteLocation::File(path.into()), config)?;
        Self::new(pool)
    }

    /// Opens an in-memory database (useful for testing).
    ///
    /// The pool is forced to a single shared connection, because independent
    /// in-memory connections would each see their own database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::open(
            SqliteLocation::memory(),
            PoolConfig::single(Duration::from_secs(10)),
        )?;
        Self::new(pool)
    }

    /// The underlying pool (exposed for lifecycle management).
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn session(&self) -> Result<Session> {
        self.pool.session()
    }
}

/// Maps a `rusqlite` error to [`Error::Conflict`] when it is a UNIQUE
/// constraint violation, naming the constrained field from the index name in
/// the driver message; everything else becomes [`Error::Storage`].
fn map_constraint(operation: &str, e: &rusqlite::Error, value: &str) -> Error {
    let text = e.to_string();
    if text.contains("UNIQUE constraint failed") {
        for (needle, field) in [
            ("users.username", "username"),
            ("users.email", "email"),
            ("messages.conversation_id, messages.sequence_number", "sequence_number"),
            ("api_keys.key_hash", "key_hash"),
        ] {
            if text.contains(needle) {
                return Error::Conflict {
                    field: field.to_string(),
                    value: value.to_string(),
                };
            }
        }
    }
    Error::storage(operation, e)
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    conn.query_row(sql, params![id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(|e| Error::storage("exists", e))
}

/// Recomputes the denormalized `message_count` of a conversation from its
/// non-deleted messages. Runs inside the caller's transaction.
fn recount(conn: &Connection, conversation_id: &ConversationId) -> Result<i64> {
    conn.execute(
        "UPDATE conversations
         SET message_count = (
             SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND deleted_at IS NULL
         ),
         updated_at = ?2
         WHERE id = ?1",
        params![conversation_id.as_str(), Utc::now()],
    )
    .map_err(|e| Error::storage("recount_messages", e))?;

    conn.query_row(
        "SELECT message_count FROM conversations WHERE id = ?1",
        params![conversation_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::storage("read_message_count", e))
}

fn next_sequence(conn: &Connection, conversation_id: &ConversationId) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE conversation_id = ?1",
        params![conversation_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::storage("next_sequence_number", e))
}

/// Inserts one message row, assigning a sequence number when not supplied.
/// Runs inside the caller's transaction; the recount happens separately.
fn insert_message(conn: &Connection, new: NewMessage) -> Result<Message> {
    if !exists(
        conn,
        "SELECT 1 FROM conversations WHERE id = ?1",
        new.conversation_id.as_str(),
    )? {
        return Err(Error::InvalidInput(format!(
            "conversation {} does not exist",
            new.conversation_id
        )));
    }

    let sequence = match new.sequence_number {
        Some(explicit) => {
            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM messages
                     WHERE conversation_id = ?1 AND sequence_number = ?2",
                    params![new.conversation_id.as_str(), explicit],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::storage("check_sequence", e))?;
            if taken.is_some() {
                return Err(Error::Conflict {
                    field: "sequence_number".to_string(),
                    value: explicit.to_string(),
                });
            }
            explicit
        },
        None => next_sequence(conn, &new.conversation_id)?,
    };

    let message = new.into_message(sequence, Utc::now());
    let history = serde_json::to_string(&message.edit_history)
        .map_err(|e| Error::storage("encode_edit_history", e))?;

    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, model, sequence_number,
                               is_edited, edit_history, deleted_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            message.id.as_str(),
            message.conversation_id.as_str(),
            message.role.as_str(),
            message.content,
            message.model,
            message.sequence_number,
            message.is_edited,
            history,
            message.deleted_at,
            message.created_at,
            message.updated_at,
        ],
    )
    .map_err(|e| map_constraint("insert_message", &e, &sequence.to_string()))?;

    Ok(message)
}

impl UserStore for SqliteBackend {
    #[instrument(skip(self, new), fields(username = %new.username))]
    fn create_user(&self, new: NewUser) -> Result<User> {
        let user = new.into_user(Utc::now());
        self.session()?.transaction(|conn| {
            if exists(conn, "SELECT 1 FROM users WHERE username = ?1", &user.username)? {
                return Err(Error::Conflict {
                    field: "username".to_string(),
                    value: user.username.clone(),
                });
            }
            if let Some(ref email) = user.email
                && exists(conn, "SELECT 1 FROM users WHERE email = ?1", email)?
            {
                return Err(Error::Conflict {
                    field: "email".to_string(),
                    value: email.clone(),
                });
            }

            conn.execute(
                "INSERT INTO users (id, username, email, full_name, is_active, is_admin,
                                    last_login, deleted_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user.id.as_str(),
                    user.username,
                    user.email,
                    user.full_name,
                    user.is_active,
                    user.is_admin,
                    user.last_login,
                    user.deleted_at,
                    user.created_at,
                    user.updated_at,
                ],
            )
            .map_err(|e| map_constraint("insert_user", &e, &user.username))?;
            Ok(())
        })?;
        Ok(user)
    }

    fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                user_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_user", e))
        })
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_user_by_username", e))
        })
    }

    fn list_users(&self, page: &Page) -> Result<Vec<User>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE deleted_at IS NULL
                 ORDER BY created_at {} LIMIT ?1 OFFSET ?2",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_list_users", e))?;
            let users = stmt
                .query_map(
                    params![i64::from(page.effective_limit()), page.offset as i64],
                    user_from_row,
                )
                .map_err(|e| Error::storage("list_users", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_users", e))?;
            Ok(users)
        })
    }

    fn update_user(&self, id: &UserId, patch: UserPatch) -> Result<Option<User>> {
        self.session()?.transaction(|conn| {
            let Some(mut user) = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id.as_str()],
                    user_from_row,
                )
                .optional()
                .map_err(|e| Error::storage("get_user", e))?
            else {
                return Ok(None);
            };

            let new_email = patch.email.clone();
            patch.apply(&mut user, Utc::now());

            if let Some(ref email) = new_email {
                let taken: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM users WHERE email = ?1 AND id <> ?2",
                        params![email, id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| Error::storage("check_email", e))?;
                if taken.is_some() {
                    return Err(Error::Conflict {
                        field: "email".to_string(),
                        value: email.clone(),
                    });
                }
            }

            conn.execute(
                "UPDATE users SET email = ?2, full_name = ?3, is_active = ?4, is_admin = ?5,
                                  updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    user.email,
                    user.full_name,
                    user.is_active,
                    user.is_admin,
                    user.updated_at,
                ],
            )
            .map_err(|e| map_constraint("update_user", &e, user.email.as_deref().unwrap_or("")))?;

            Ok(Some(user))
        })
    }

    fn delete_user(&self, id: &UserId, soft: bool) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = if soft {
                conn.execute(
                    "UPDATE users SET deleted_at = ?2, is_active = 0, updated_at = ?2
                     WHERE id = ?1 AND deleted_at IS NULL",
                    params![id.as_str(), Utc::now()],
                )
            } else {
                conn.execute("DELETE FROM users WHERE id = ?1", params![id.as_str()])
            }
            .map_err(|e| Error::storage("delete_user", e))?;
            Ok(affected > 0)
        })
    }

    fn record_login(&self, id: &UserId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "UPDATE users SET last_login = ?2, updated_at = ?2 WHERE id = ?1",
                    params![id.as_str(), Utc::now()],
                )
                .map_err(|e| Error::storage("record_login", e))?;
            Ok(affected > 0)
        })
    }
}

impl ConversationStore for SqliteBackend {
    fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let conversation = new.into_conversation(Utc::now());
        let metadata = serde_json::to_string(&conversation.metadata)
            .map_err(|e| Error::storage("encode_metadata", e))?;
        self.session()?.run(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, tags, is_archived, is_pinned,
                                            message_count, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    conversation.id.as_str(),
                    conversation.user_id.as_str(),
                    conversation.title,
                    join_tags(&conversation.tags),
                    conversation.is_archived,
                    conversation.is_pinned,
                    conversation.message_count,
                    metadata,
                    conversation.created_at,
                    conversation.updated_at,
                ],
            )
            .map_err(|e| Error::storage("insert_conversation", e))?;
            Ok(())
        })?;
        Ok(conversation)
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.as_str()],
                conversation_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_conversation", e))
        })
    }

    fn list_conversations(
        &self,
        filter: &ConversationFilter,
        page: &Page,
    ) -> Result<Vec<Conversation>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Text(user_id.as_str().to_string()));
        }
        if let Some(archived) = filter.is_archived {
            clauses.push("is_archived = ?");
            values.push(Value::Integer(i64::from(archived)));
        }
        if let Some(pinned) = filter.is_pinned {
            clauses.push("is_pinned = ?");
            values.push(Value::Integer(i64::from(pinned)));
        }
        if let Some(ref tag) = filter.tag {
            clauses.push("(',' || tags || ',') LIKE ?");
            values.push(Value::Text(format!("%,{},%", tag.to_lowercase())));
        }
        if let Some(ref fragment) = filter.title_contains {
            clauses.push("LOWER(title) LIKE ?");
            values.push(Value::Text(format!("%{}%", fragment.to_lowercase())));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations {where_sql}
             ORDER BY updated_at {} LIMIT ? OFFSET ?",
            page.order.as_sql()
        );
        values.push(Value::Integer(i64::from(page.effective_limit())));
        #[allow(clippy::cast_possible_wrap)]
        values.push(Value::Integer(page.offset as i64));

        self.session()?.run(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_list_conversations", e))?;
            let conversations = stmt
                .query_map(params_from_iter(values.iter()), conversation_from_row)
                .map_err(|e| Error::storage("list_conversations", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_conversations", e))?;
            Ok(conversations)
        })
    }

    fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>> {
        self.session()?.transaction(|conn| {
            let Some(mut conversation) = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    params![id.as_str()],
                    conversation_from_row,
                )
                .optional()
                .map_err(|e| Error::storage("get_conversation", e))?
            else {
                return Ok(None);
            };

            patch.apply(&mut conversation, Utc::now());
            let metadata = serde_json::to_string(&conversation.metadata)
                .map_err(|e| Error::storage("encode_metadata", e))?;

            conn.execute(
                "UPDATE conversations
                 SET title = ?2, tags = ?3, is_archived = ?4, is_pinned = ?5,
                     metadata = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    conversation.title,
                    join_tags(&conversation.tags),
                    conversation.is_archived,
                    conversation.is_pinned,
                    metadata,
                    conversation.updated_at,
                ],
            )
            .map_err(|e| Error::storage("update_conversation", e))?;

            Ok(Some(conversation))
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    fn delete_conversation(&self, id: &ConversationId) -> Result<bool> {
        // Owned messages, memories, and uploads go with it via ON DELETE CASCADE.
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    params![id.as_str()],
                )
                .map_err(|e| Error::storage("delete_conversation", e))?;
            Ok(affected > 0)
        })
    }

    fn recount_messages(&self, id: &ConversationId) -> Result<Option<i64>> {
        self.session()?.transaction(|conn| {
            if !exists(conn, "SELECT 1 FROM conversations WHERE id = ?1", id.as_str())? {
                return Ok(None);
            }
            recount(conn, id).map(Some)
        })
    }
}

impl MessageStore for SqliteBackend {
    #[instrument(skip(self, new), fields(conversation_id = %new.conversation_id))]
    fn append_message(&self, new: NewMessage) -> Result<Message> {
        self.session()?.transaction(|conn| {
            let message = insert_message(conn, new)?;
            recount(conn, &message.conversation_id)?;
            Ok(message)
        })
    }

    fn append_messages(&self, batch: Vec<NewMessage>) -> Result<Vec<Message>> {
        let mut inserted = Vec::with_capacity(batch.len());
        let session = self.session()?;

        // One transaction per chunk: a failure rolls back the current chunk
        // only, leaving earlier chunks applied.
        for chunk in batch.chunks(BULK_CHUNK_SIZE) {
            let messages = session.transaction(|conn| {
                let mut out = Vec::with_capacity(chunk.len());
                let mut touched: BTreeSet<String> = BTreeSet::new();
                for new in chunk {
                    let message = insert_message(conn, new.clone())?;
                    touched.insert(message.conversation_id.as_str().to_string());
                    out.push(message);
                }
                for conversation_id in &touched {
                    recount(conn, &ConversationId::new(conversation_id.clone()))?;
                }
                Ok(out)
            })?;
            inserted.extend(messages);
        }

        Ok(inserted)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                message_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_message", e))
        })
    }

    fn list_messages(&self, conversation_id: &ConversationId, page: &Page) -> Result<Vec<Message>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND deleted_at IS NULL
                 ORDER BY sequence_number {} LIMIT ?2 OFFSET ?3",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_list_messages", e))?;
            #[allow(clippy::cast_possible_wrap)]
            let messages = stmt
                .query_map(
                    params![
                        conversation_id.as_str(),
                        i64::from(page.effective_limit()),
                        page.offset as i64
                    ],
                    message_from_row,
                )
                .map_err(|e| Error::storage("list_messages", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_messages", e))?;
            Ok(messages)
        })
    }

    fn search_messages(
        &self,
        conversation_id: &ConversationId,
        needle: &str,
        page: &Page,
    ) -> Result<Vec<Message>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND deleted_at IS NULL
                   AND LOWER(content) LIKE ?2
                 ORDER BY sequence_number {} LIMIT ?3 OFFSET ?4",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_search_messages", e))?;
            #[allow(clippy::cast_possible_wrap)]
            let messages = stmt
                .query_map(
                    params![
                        conversation_id.as_str(),
                        format!("%{}%", needle.to_lowercase()),
                        i64::from(page.effective_limit()),
                        page.offset as i64
                    ],
                    message_from_row,
                )
                .map_err(|e| Error::storage("search_messages", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("search_messages", e))?;
            Ok(messages)
        })
    }

    fn edit_message(&self, id: &MessageId, content: &str) -> Result<Option<Message>> {
        self.session()?.transaction(|conn| {
            let Some(mut message) = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![id.as_str()],
                    message_from_row,
                )
                .optional()
                .map_err(|e| Error::storage("get_message", e))?
            else {
                return Ok(None);
            };

            message.record_edit(content.to_string(), Utc::now());
            let history = serde_json::to_string(&message.edit_history)
                .map_err(|e| Error::storage("encode_edit_history", e))?;

            conn.execute(
                "UPDATE messages
                 SET content = ?2, is_edited = 1, edit_history = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id.as_str(), message.content, history, message.updated_at],
            )
            .map_err(|e| Error::storage("edit_message", e))?;

            Ok(Some(message))
        })
    }

    fn delete_message(&self, id: &MessageId, soft: bool) -> Result<bool> {
        self.session()?.transaction(|conn| {
            let Some(conversation_id) = conn
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| Error::storage("get_message", e))?
            else {
                return Ok(false);
            };

            let affected = if soft {
                conn.execute(
                    "UPDATE messages SET deleted_at = ?2, updated_at = ?2
                     WHERE id = ?1 AND deleted_at IS NULL",
                    params![id.as_str(), Utc::now()],
                )
            } else {
                conn.execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])
            }
            .map_err(|e| Error::storage("delete_message", e))?;

            if affected > 0 {
                recount(conn, &ConversationId::new(conversation_id))?;
            }
            Ok(affected > 0)
        })
    }

    fn next_sequence_number(&self, conversation_id: &ConversationId) -> Result<i64> {
        self.session()?.run(|conn| next_sequence(conn, conversation_id))
    }
}

impl MemoryStore for SqliteBackend {
    fn create_memory(&self, new: NewMemory) -> Result<MemoryFact> {
        let memory = new.into_memory(Utc::now());
        self.session()?.run(|conn| {
            conn.execute(
                "INSERT INTO memories (id, user_id, conversation_id, question, answer,
                                       importance, tags, access_count, last_accessed,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    memory.id.as_str(),
                    memory.user_id.as_str(),
                    memory.conversation_id.as_ref().map(|c| c.as_str()),
                    memory.question,
                    memory.answer,
                    memory.importance,
                    join_tags(&memory.tags),
                    memory.access_count,
                    memory.last_accessed,
                    memory.created_at,
                    memory.updated_at,
                ],
            )
            .map_err(|e| Error::storage("insert_memory", e))?;
            Ok(())
        })?;
        Ok(memory)
    }

    fn get_memory(&self, id: &MemoryId) -> Result<Option<MemoryFact>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id.as_str()],
                memory_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_memory", e))
        })
    }

    fn list_memories(&self, user_id: &UserId, page: &Page) -> Result<Vec<MemoryFact>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1
                 ORDER BY importance {}, created_at DESC LIMIT ?2 OFFSET ?3",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_list_memories", e))?;
            #[allow(clippy::cast_possible_wrap)]
            let memories = stmt
                .query_map(
                    params![
                        user_id.as_str(),
                        i64::from(page.effective_limit()),
                        page.offset as i64
                    ],
                    memory_from_row,
                )
                .map_err(|e| Error::storage("list_memories", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_memories", e))?;
            Ok(memories)
        })
    }

    fn search_memories(
        &self,
        user_id: &UserId,
        query: &str,
        page: &Page,
    ) -> Result<Vec<MemoryFact>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1 AND (LOWER(question) LIKE ?2 OR LOWER(answer) LIKE ?2)
                 ORDER BY importance DESC, created_at {} LIMIT ?3 OFFSET ?4",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_search_memories", e))?;
            #[allow(clippy::cast_possible_wrap)]
            let memories = stmt
                .query_map(
                    params![
                        user_id.as_str(),
                        format!("%{}%", query.to_lowercase()),
                        i64::from(page.effective_limit()),
                        page.offset as i64
                    ],
                    memory_from_row,
                )
                .map_err(|e| Error::storage("search_memories", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("search_memories", e))?;
            Ok(memories)
        })
    }

    fn memories_with_tags(
        &self,
        user_id: &UserId,
        tags: &[String],
        page: &Page,
    ) -> Result<Vec<MemoryFact>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::with_capacity(tags.len());
        let mut values: Vec<Value> = vec![Value::Text(user_id.as_str().to_string())];
        for tag in tags {
            clauses.push("(',' || tags || ',') LIKE ?");
            values.push(Value::Text(format!("%,{},%", tag.to_lowercase())));
        }
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE user_id = ? AND ({})
             ORDER BY importance DESC, created_at {} LIMIT ? OFFSET ?",
            clauses.join(" OR "),
            page.order.as_sql()
        );
        values.push(Value::Integer(i64::from(page.effective_limit())));
        #[allow(clippy::cast_possible_wrap)]
        values.push(Value::Integer(page.offset as i64));

        self.session()?.run(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_memories_with_tags", e))?;
            let memories = stmt
                .query_map(params_from_iter(values.iter()), memory_from_row)
                .map_err(|e| Error::storage("memories_with_tags", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("memories_with_tags", e))?;
            Ok(memories)
        })
    }

    fn update_memory(&self, id: &MemoryId, patch: MemoryPatch) -> Result<Option<MemoryFact>> {
        self.session()?.transaction(|conn| {
            let Some(mut memory) = conn
                .query_row(
                    &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                    params![id.as_str()],
                    memory_from_row,
                )
                .optional()
                .map_err(|e| Error::storage("get_memory", e))?
            else {
                return Ok(None);
            };

            patch.apply(&mut memory, Utc::now());

            conn.execute(
                "UPDATE memories
                 SET question = ?2, answer = ?3, importance = ?4, tags = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    memory.question,
                    memory.answer,
                    memory.importance,
                    join_tags(&memory.tags),
                    memory.updated_at,
                ],
            )
            .map_err(|e| Error::storage("update_memory", e))?;

            Ok(Some(memory))
        })
    }

    fn touch_memory(&self, id: &MemoryId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "UPDATE memories
                     SET access_count = access_count + 1, last_accessed = ?2
                     WHERE id = ?1",
                    params![id.as_str(), Utc::now()],
                )
                .map_err(|e| Error::storage("touch_memory", e))?;
            Ok(affected > 0)
        })
    }

    fn delete_memory(&self, id: &MemoryId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute("DELETE FROM memories WHERE id = ?1", params![id.as_str()])
                .map_err(|e| Error::storage("delete_memory", e))?;
            Ok(affected > 0)
        })
    }
}

impl UploadStore for SqliteBackend {
    fn create_upload(&self, new: NewUpload) -> Result<UploadedFile> {
        let upload = new.into_upload(Utc::now());
        self.session()?.run(|conn| {
            conn.execute(
                "INSERT INTO uploaded_files (id, user_id, conversation_id, filename, file_path,
                                             file_type, file_size, is_processed, analysis_result,
                                             created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    upload.id.as_str(),
                    upload.user_id.as_str(),
                    upload.conversation_id.as_str(),
                    upload.filename,
                    upload.file_path,
                    upload.file_type,
                    upload.file_size,
                    upload.is_processed,
                    Option::<String>::None,
                    upload.created_at,
                    upload.updated_at,
                ],
            )
            .map_err(|e| Error::storage("insert_upload", e))?;
            Ok(())
        })?;
        Ok(upload)
    }

    fn get_upload(&self, id: &FileId) -> Result<Option<UploadedFile>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM uploaded_files WHERE id = ?1"),
                params![id.as_str()],
                upload_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_upload", e))
        })
    }

    fn list_uploads_for_user(&self, user_id: &UserId, page: &Page) -> Result<Vec<UploadedFile>> {
        self.list_uploads("user_id", user_id.as_str(), page)
    }

    fn list_uploads_for_conversation(
        &self,
        conversation_id: &ConversationId,
        page: &Page,
    ) -> Result<Vec<UploadedFile>> {
        self.list_uploads("conversation_id", conversation_id.as_str(), page)
    }

    fn mark_processed(
        &self,
        id: &FileId,
        analysis: serde_json::Value,
    ) -> Result<Option<UploadedFile>> {
        let encoded =
            serde_json::to_string(&analysis).map_err(|e| Error::storage("encode_analysis", e))?;
        self.session()?.transaction(|conn| {
            let affected = conn
                .execute(
                    "UPDATE uploaded_files
                     SET is_processed = 1, analysis_result = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![id.as_str(), encoded, Utc::now()],
                )
                .map_err(|e| Error::storage("mark_processed", e))?;
            if affected == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM uploaded_files WHERE id = ?1"),
                params![id.as_str()],
                upload_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_upload", e))
        })
    }

    fn delete_upload(&self, id: &FileId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM uploaded_files WHERE id = ?1",
                    params![id.as_str()],
                )
                .map_err(|e| Error::storage("delete_upload", e))?;
            Ok(affected > 0)
        })
    }
}

impl SqliteBackend {
    fn list_uploads(&self, column: &str, value: &str, page: &Page) -> Result<Vec<UploadedFile>> {
        self.session()?.run(|conn| {
            let sql = format!(
                "SELECT {UPLOAD_COLUMNS} FROM uploaded_files
                 WHERE {column} = ?1
                 ORDER BY created_at {} LIMIT ?2 OFFSET ?3",
                page.order.as_sql()
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::storage("prepare_list_uploads", e))?;
            #[allow(clippy::cast_possible_wrap)]
            let uploads = stmt
                .query_map(
                    params![value, i64::from(page.effective_limit()), page.offset as i64],
                    upload_from_row,
                )
                .map_err(|e| Error::storage("list_uploads", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_uploads", e))?;
            Ok(uploads)
        })
    }
}

impl ApiKeyStore for SqliteBackend {
    fn create_api_key(&self, new: NewApiKey) -> Result<ApiKey> {
        let key = new.into_api_key(Utc::now());
        self.session()?.run(|conn| {
            conn.execute(
                "INSERT INTO api_keys (id, user_id, label, prefix, key_hash, last_used_at,
                                       revoked_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key.id.as_str(),
                    key.user_id.as_str(),
                    key.label,
                    key.prefix,
                    key.key_hash,
                    key.last_used_at,
                    key.revoked_at,
                    key.created_at,
                ],
            )
            .map_err(|e| map_constraint("insert_api_key", &e, &key.prefix))?;
            Ok(())
        })?;
        Ok(key)
    }

    fn get_api_key(&self, id: &ApiKeyId) -> Result<Option<ApiKey>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
                params![id.as_str()],
                api_key_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_api_key", e))
        })
    }

    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        self.session()?.run(|conn| {
            conn.query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
                params![key_hash],
                api_key_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("find_api_key_by_hash", e))
        })
    }

    fn list_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKey>> {
        self.session()?.run(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {API_KEY_COLUMNS} FROM api_keys
                     WHERE user_id = ?1 ORDER BY created_at DESC"
                ))
                .map_err(|e| Error::storage("prepare_list_api_keys", e))?;
            let keys = stmt
                .query_map(params![user_id.as_str()], api_key_from_row)
                .map_err(|e| Error::storage("list_api_keys", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_api_keys", e))?;
            Ok(keys)
        })
    }

    fn touch_api_key(&self, id: &ApiKeyId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1",
                    params![id.as_str(), Utc::now()],
                )
                .map_err(|e| Error::storage("touch_api_key", e))?;
            Ok(affected > 0)
        })
    }

    fn revoke_api_key(&self, id: &ApiKeyId) -> Result<bool> {
        self.session()?.run(|conn| {
            let affected = conn
                .execute(
                    "UPDATE api_keys SET revoked_at = ?2 WHERE id = ?1 AND revoked_at IS NULL",
                    params![id.as_str(), Utc::now()],
                )
                .map_err(|e| Error::storage("revoke_api_key", e))?;
            Ok(affected > 0)
        })
    }
}

//! Storage-capability traits.
//!
//! One trait per entity repository, combined by the [`StorageBackend`]
//! supertrait. Backends are the authoritative source of truth; the cache
//! layer never reaches in here on its own.
//!
//! Shared contract across all entity traits:
//!
//! - `get_*` returns `Ok(None)` for absent entities, never an error
//! - `list_*` is bounded by [`crate::models::Page`]; filters AND together
//! - `create_*` assigns IDs/timestamps and returns the persisted entity;
//!   uniqueness violations surface as [`crate::Error::Conflict`]
//! - `update_*` merges only provided fields, refreshes `updated_at`, and
//!   returns `Ok(None)` when the target does not exist
//! - `delete_*` returns whether anything was removed or flagged

use crate::Result;
use crate::models::{
    ApiKey, ApiKeyId, Conversation, ConversationFilter, ConversationId, ConversationPatch, FileId,
    MemoryFact, MemoryId, MemoryPatch, Message, MessageId, NewApiKey, NewConversation, NewMemory,
    NewMessage, NewUpload, NewUser, Page, UploadedFile, User, UserId, UserPatch,
};

/// Repository contract for users.
pub trait UserStore: Send + Sync {
    /// Persists a new user. Duplicate username or email is a conflict.
    fn create_user(&self, new: NewUser) -> Result<User>;

    /// Point lookup by ID.
    fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Point lookup by unique username.
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Lists users ordered by creation time, soft-deleted ones excluded.
    fn list_users(&self, page: &Page) -> Result<Vec<User>>;

    /// Merges the patch into an existing user.
    fn update_user(&self, id: &UserId, patch: UserPatch) -> Result<Option<User>>;

    /// Deletes a user. `soft` sets `deleted_at` and deactivates; hard delete
    /// removes the row. Owned entities are not cascaded either way.
    fn delete_user(&self, id: &UserId, soft: bool) -> Result<bool>;

    /// Stamps `last_login` with the current time.
    fn record_login(&self, id: &UserId) -> Result<bool>;
}

/// Repository contract for conversations.
pub trait ConversationStore: Send + Sync {
    /// Persists a new conversation with `message_count = 0`.
    fn create_conversation(&self, new: NewConversation) -> Result<Conversation>;

    /// Point lookup by ID.
    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    /// Lists conversations matching the filter, ordered by `updated_at`.
    fn list_conversations(
        &self,
        filter: &ConversationFilter,
        page: &Page,
    ) -> Result<Vec<Conversation>>;

    /// Merges the patch into an existing conversation.
    fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>>;

    /// Deletes a conversation and cascades to its messages, memories, and
    /// uploaded files.
    fn delete_conversation(&self, id: &ConversationId) -> Result<bool>;

    /// Recomputes `message_count` from the non-deleted messages and stores
    /// the result. Idempotent. Returns the recomputed count, or `Ok(None)`
    /// if the conversation does not exist.
    fn recount_messages(&self, id: &ConversationId) -> Result<Option<i64>>;
}

/// Repository contract for messages.
pub trait MessageStore: Send + Sync {
    /// Appends a message. Without an explicit sequence number the store
    /// assigns `max(existing) + 1` (1 for an empty conversation); an explicit
    /// collision is a conflict. The parent's `message_count` is recounted as
    /// part of the operation.
    fn append_message(&self, new: NewMessage) -> Result<Message>;

    /// Appends a batch of messages in fixed-size chunks
    /// ([`super::BULK_CHUNK_SIZE`]). A failure leaves earlier chunks applied.
    fn append_messages(&self, batch: Vec<NewMessage>) -> Result<Vec<Message>>;

    /// Point lookup by ID. Soft-deleted messages are still returned here.
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Lists non-deleted messages of a conversation ordered by sequence
    /// number.
    fn list_messages(&self, conversation_id: &ConversationId, page: &Page) -> Result<Vec<Message>>;

    /// Case-insensitive substring search over non-deleted message content
    /// within a conversation.
    fn search_messages(
        &self,
        conversation_id: &ConversationId,
        needle: &str,
        page: &Page,
    ) -> Result<Vec<Message>>;

    /// Replaces the content, appending the prior content to the append-only
    /// edit history and setting `is_edited`.
    fn edit_message(&self, id: &MessageId, content: &str) -> Result<Option<Message>>;

    /// Deletes a message (`soft` sets `deleted_at`) and recounts the parent.
    fn delete_message(&self, id: &MessageId, soft: bool) -> Result<bool>;

    /// The sequence number the next append would receive.
    fn next_sequence_number(&self, conversation_id: &ConversationId) -> Result<i64>;
}

/// Repository contract for memory facts.
pub trait MemoryStore: Send + Sync {
    /// Persists a new memory fact (importance clamped, tags lowercased).
    fn create_memory(&self, new: NewMemory) -> Result<MemoryFact>;

    /// Point lookup by ID.
    fn get_memory(&self, id: &MemoryId) -> Result<Option<MemoryFact>>;

    /// Lists a user's memory facts ordered by importance, then recency.
    fn list_memories(&self, user_id: &UserId, page: &Page) -> Result<Vec<MemoryFact>>;

    /// Case-insensitive substring search over question and answer text.
    fn search_memories(&self, user_id: &UserId, query: &str, page: &Page)
    -> Result<Vec<MemoryFact>>;

    /// Lists facts sharing at least one of the given tags (tag overlap).
    fn memories_with_tags(
        &self,
        user_id: &UserId,
        tags: &[String],
        page: &Page,
    ) -> Result<Vec<MemoryFact>>;

    /// Merges the patch into an existing fact.
    fn update_memory(&self, id: &MemoryId, patch: MemoryPatch) -> Result<Option<MemoryFact>>;

    /// Bumps `access_count` and stamps `last_accessed`.
    fn touch_memory(&self, id: &MemoryId) -> Result<bool>;

    /// Hard-deletes a fact.
    fn delete_memory(&self, id: &MemoryId) -> Result<bool>;
}

/// Repository contract for uploaded-file metadata.
pub trait UploadStore: Send + Sync {
    /// Registers an uploaded file.
    fn create_upload(&self, new: NewUpload) -> Result<UploadedFile>;

    /// Point lookup by ID.
    fn get_upload(&self, id: &FileId) -> Result<Option<UploadedFile>>;

    /// Lists a user's uploads ordered by creation time.
    fn list_uploads_for_user(&self, user_id: &UserId, page: &Page) -> Result<Vec<UploadedFile>>;

    /// Lists a conversation's uploads ordered by creation time.
    fn list_uploads_for_conversation(
        &self,
        conversation_id: &ConversationId,
        page: &Page,
    ) -> Result<Vec<UploadedFile>>;

    /// Stores the analysis result and flips `is_processed`.
    fn mark_processed(
        &self,
        id: &FileId,
        analysis: serde_json::Value,
    ) -> Result<Option<UploadedFile>>;

    /// Hard-deletes an upload record.
    fn delete_upload(&self, id: &FileId) -> Result<bool>;
}

/// Repository contract for API keys.
pub trait ApiKeyStore: Send + Sync {
    /// Persists a generated key record (digest only, never plaintext).
    fn create_api_key(&self, new: NewApiKey) -> Result<ApiKey>;

    /// Point lookup by ID.
    fn get_api_key(&self, id: &ApiKeyId) -> Result<Option<ApiKey>>;

    /// Lookup by secret digest, used for validation.
    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;

    /// Lists a user's keys, newest first.
    fn list_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKey>>;

    /// Stamps `last_used_at` with the current time.
    fn touch_api_key(&self, id: &ApiKeyId) -> Result<bool>;

    /// Marks the key revoked. Idempotent; returns whether the key existed
    /// and was active.
    fn revoke_api_key(&self, id: &ApiKeyId) -> Result<bool>;
}

/// The full repository contract a backend adapter provides.
pub trait StorageBackend:
    UserStore + ConversationStore + MessageStore + MemoryStore + UploadStore + ApiKeyStore
{
}

impl<T> StorageBackend for T where
    T: UserStore + ConversationStore + MessageStore + MemoryStore + UploadStore + ApiKeyStore
{
}

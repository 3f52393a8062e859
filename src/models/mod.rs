//! Data models for convostore.
//!
//! This module contains all the core data structures used throughout the
//! system. Entities derive `Serialize`/`Deserialize` because both the cache
//! layer and the document backend persist them as JSON.

mod api_key;
mod conversation;
mod memory;
mod message;
mod query;
mod upload;
mod user;

pub use api_key::{ApiKey, ApiKeyId, GeneratedKey, NewApiKey, api_key_prefix, hash_api_key};
pub use conversation::{Conversation, ConversationFilter, ConversationId, ConversationPatch,
    NewConversation};
pub use memory::{
    IMPORTANCE_MAX, IMPORTANCE_MIN, MemoryFact, MemoryId, MemoryPatch, NewMemory,
    clamp_importance, normalize_tags,
};
pub use message::{EditRecord, Message, MessageId, NewMessage, Role};
pub use query::{MAX_PAGE_LIMIT, Page, SortOrder};
pub use upload::{FileId, NewUpload, UploadedFile};
pub use user::{NewUser, User, UserId, UserPatch};

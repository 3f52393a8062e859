//! Deterministic cache key construction.
//!
//! Keys are `entity:id` for point lookups and `entity:list:scope:digest` for
//! list queries, where the digest folds the query parameters into a short
//! stable token. Writes invalidate by exact key for entities and by prefix
//! for dependent list keys, so the layout here is load-bearing: every list
//! key for a scope must share that scope's prefix.

use crate::models::{ConversationId, MemoryId, MessageId, UserId};
use sha2::{Digest, Sha256};

/// Length of the hex digest folded into list keys.
const DIGEST_LEN: usize = 12;

/// Short stable digest of list-query parameters.
#[must_use]
pub fn params_digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

/// Key for a user entity.
#[must_use]
pub fn user(id: &UserId) -> String {
    format!("user:{id}")
}

/// Key for a username → user lookup.
#[must_use]
pub fn user_by_name(username: &str) -> String {
    format!("user:name:{username}")
}

/// Key for a conversation entity.
#[must_use]
pub fn conversation(id: &ConversationId) -> String {
    format!("conv:{id}")
}

/// Prefix shared by all conversation-list keys of one user.
#[must_use]
pub fn conversation_list_prefix(user_id: &UserId) -> String {
    format!("conv:list:{user_id}:")
}

/// Key for one conversation-list query.
#[must_use]
pub fn conversation_list(user_id: &UserId, canonical_params: &str) -> String {
    format!(
        "{}{}",
        conversation_list_prefix(user_id),
        params_digest(canonical_params)
    )
}

/// Key for a message entity.
#[must_use]
pub fn message(id: &MessageId) -> String {
    format!("msg:{id}")
}

/// Prefix shared by all message-list keys of one conversation.
#[must_use]
pub fn message_list_prefix(conversation_id: &ConversationId) -> String {
    format!("msg:list:{conversation_id}:")
}

/// Key for one message-list query.
#[must_use]
pub fn message_list(conversation_id: &ConversationId, canonical_params: &str) -> String {
    format!(
        "{}{}",
        message_list_prefix(conversation_id),
        params_digest(canonical_params)
    )
}

/// Key for a memory fact.
#[must_use]
pub fn memory(id: &MemoryId) -> String {
    format!("mem:{id}")
}

/// Prefix shared by all memory-list keys of one user.
#[must_use]
pub fn memory_list_prefix(user_id: &UserId) -> String {
    format!("mem:list:{user_id}:")
}

/// Key for one memory-list query.
#[must_use]
pub fn memory_list(user_id: &UserId, canonical_params: &str) -> String {
    format!(
        "{}{}",
        memory_list_prefix(user_id),
        params_digest(canonical_params)
    )
}

/// Key for an uploaded-file entity.
#[must_use]
pub fn upload(id: &crate::models::FileId) -> String {
    format!("file:{id}")
}

/// Prefix shared by all upload-list keys of one conversation.
#[must_use]
pub fn upload_list_prefix(conversation_id: &ConversationId) -> String {
    format!("file:list:{conversation_id}:")
}

/// Prefix shared by all upload-list keys of one user.
#[must_use]
pub fn upload_user_list_prefix(user_id: &UserId) -> String {
    format!("file:ulist:{user_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_short() {
        let a = params_digest("o=0;l=50;s=DESC");
        let b = params_digest("o=0;l=50;s=DESC");
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_LEN);
        assert_ne!(a, params_digest("o=50;l=50;s=DESC"));
    }

    #[test]
    fn test_list_keys_share_scope_prefix() {
        let conv = ConversationId::new("c1");
        let key = message_list(&conv, "o=0;l=50;s=ASC");
        assert!(key.starts_with(&message_list_prefix(&conv)));
    }
}

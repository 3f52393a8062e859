//! Cache-aside conversation service.
//!
//! Conversation writes ripple further than the entity itself: the owner's
//! list keys carry denormalized state (`message_count`, flags, title), so
//! every write also drops the owner's list prefix.

use super::cached;
use crate::cache::{CacheBackend, keys};
use crate::models::{
    Conversation, ConversationFilter, ConversationId, ConversationPatch, NewConversation, Page,
    UserId,
};
use crate::storage::{ConversationStore, StorageBackend};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Conversation operations with a read-through cache.
#[derive(Clone)]
pub struct ConversationService {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ConversationService {
    /// Builds the service from an injected backend and cache. Usually
    /// obtained from [`super::Store`] instead.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            ttl,
        }
    }

    /// Starts a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty title.
    pub fn start(&self, user_id: &UserId, title: &str, tags: &[String]) -> Result<Conversation> {
        self.start_with_metadata(user_id, title, tags, None)
    }

    /// Starts a conversation carrying initial metadata.
    pub fn start_with_metadata(
        &self,
        user_id: &UserId,
        title: &str,
        tags: &[String],
        metadata: Option<serde_json::Value>,
    ) -> Result<Conversation> {
        if title.trim().is_empty() {
            return Err(Error::InvalidInput("title cannot be empty".to_string()));
        }

        let conversation = self.backend.create_conversation(NewConversation {
            user_id: user_id.clone(),
            title: title.to_string(),
            tags: tags.to_vec(),
            metadata,
        })?;
        cached::invalidate_prefixes(
            self.cache.as_ref(),
            &[keys::conversation_list_prefix(user_id)],
        );
        Ok(conversation)
    }

    /// Fetches a conversation through the cache.
    pub fn get(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        cached::read_through(self.cache.as_ref(), &keys::conversation(id), self.ttl, || {
            self.backend.get_conversation(id)
        })
    }

    /// Lists conversations. User-scoped queries go through the cache; the
    /// rare unscoped (administrative) listing reads storage directly, since
    /// it has no owner prefix to invalidate under.
    pub fn list(&self, filter: &ConversationFilter, page: &Page) -> Result<Vec<Conversation>> {
        let Some(ref user_id) = filter.user_id else {
            return self.backend.list_conversations(filter, page);
        };

        let params = format!("{};{}", filter.canonical(), page.canonical());
        let key = keys::conversation_list(user_id, &params);
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.list_conversations(filter, page)
        })
    }

    /// Applies a patch (title, tags, flags, metadata) and invalidates.
    pub fn update(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>> {
        let updated = self.backend.update_conversation(id, patch)?;
        if let Some(ref conversation) = updated {
            self.invalidate(conversation);
        }
        Ok(updated)
    }

    /// Toggles the archived flag.
    pub fn set_archived(&self, id: &ConversationId, archived: bool) -> Result<Option<Conversation>> {
        self.update(
            id,
            ConversationPatch {
                is_archived: Some(archived),
                ..ConversationPatch::default()
            },
        )
    }

    /// Toggles the pinned flag.
    pub fn set_pinned(&self, id: &ConversationId, pinned: bool) -> Result<Option<Conversation>> {
        self.update(
            id,
            ConversationPatch {
                is_pinned: Some(pinned),
                ..ConversationPatch::default()
            },
        )
    }

    /// Deletes a conversation, cascading to messages, memories, and uploads.
    ///
    /// The conversation entry, the owner's conversation lists, and the
    /// dependent list prefixes are all invalidated. Point entries of
    /// cascaded children are left to expire by TTL: their IDs are not known
    /// here without enumerating storage first.
    pub fn delete(&self, id: &ConversationId) -> Result<bool> {
        let conversation = self.backend.get_conversation(id)?;
        let deleted = self.backend.delete_conversation(id)?;
        if deleted {
            let mut prefixes = vec![
                keys::message_list_prefix(id),
                keys::upload_list_prefix(id),
            ];
            if let Some(ref conversation) = conversation {
                prefixes.push(keys::conversation_list_prefix(&conversation.user_id));
                prefixes.push(keys::memory_list_prefix(&conversation.user_id));
                prefixes.push(keys::upload_user_list_prefix(&conversation.user_id));
            }
            cached::invalidate(self.cache.as_ref(), &[keys::conversation(id)]);
            cached::invalidate_prefixes(self.cache.as_ref(), &prefixes);
        }
        Ok(deleted)
    }

    /// Recomputes the denormalized message count and invalidates.
    pub fn recount(&self, id: &ConversationId) -> Result<Option<i64>> {
        let count = self.backend.recount_messages(id)?;
        if count.is_some()
            && let Some(conversation) = self.backend.get_conversation(id)?
        {
            self.invalidate(&conversation);
        }
        Ok(count)
    }

    fn invalidate(&self, conversation: &Conversation) {
        cached::invalidate(self.cache.as_ref(), &[keys::conversation(&conversation.id)]);
        cached::invalidate_prefixes(
            self.cache.as_ref(),
            &[keys::conversation_list_prefix(&conversation.user_id)],
        );
    }
}

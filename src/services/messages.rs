//! Cache-aside message service.
//!
//! A message write is the classic dependent-key case: it changes the
//! message lists of its conversation *and* the parent conversation's
//! denormalized `message_count`, so both are invalidated alongside the
//! message entry itself.

use super::cached;
use crate::cache::{CacheBackend, keys};
use crate::models::{ConversationId, Message, MessageId, NewMessage, Page, Role};
use crate::storage::{ConversationStore, MessageStore, StorageBackend};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Message operations with a read-through cache.
#[derive(Clone)]
pub struct MessageService {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl MessageService {
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

    /// Appends a message, assigning the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty content or a missing
    /// conversation.
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
        model: Option<&str>,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput(
                "message content cannot be empty".to_string(),
            ));
        }

        let message = self.backend.append_message(NewMessage {
            conversation_id: conversation_id.clone(),
            role,
            content: content.to_string(),
            model: model.map(ToString::to_string),
            sequence_number: None,
        })?;
        self.invalidate_for_conversation(conversation_id);
        Ok(message)
    }

    /// Appends a prepared batch (chunked by the backend).
    pub fn append_many(&self, batch: Vec<NewMessage>) -> Result<Vec<Message>> {
        for new in &batch {
            if new.content.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "message content cannot be empty".to_string(),
                ));
            }
        }

        let touched: BTreeSet<ConversationId> = batch
            .iter()
            .map(|new| new.conversation_id.clone())
            .collect();
        let messages = self.backend.append_messages(batch)?;
        for conversation_id in &touched {
            self.invalidate_for_conversation(conversation_id);
        }
        Ok(messages)
    }

    /// Fetches a message through the cache.
    pub fn get(&self, id: &MessageId) -> Result<Option<Message>> {
        cached::read_through(self.cache.as_ref(), &keys::message(id), self.ttl, || {
            self.backend.get_message(id)
        })
    }

    /// Lists a conversation's messages in sequence order through the cache.
    pub fn history(&self, conversation_id: &ConversationId, page: &Page) -> Result<Vec<Message>> {
        let key = keys::message_list(conversation_id, &page.canonical());
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.list_messages(conversation_id, page)
        })
    }

    /// Substring search within a conversation, cached under the same list
    /// prefix so message writes drop search results too.
    pub fn search(
        &self,
        conversation_id: &ConversationId,
        needle: &str,
        page: &Page,
    ) -> Result<Vec<Message>> {
        let params = format!("q={needle};{}", page.canonical());
        let key = keys::message_list(conversation_id, &params);
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.search_messages(conversation_id, needle, page)
        })
    }

    /// Edits a message, appending the prior content to its edit history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty replacement content.
    pub fn edit(&self, id: &MessageId, content: &str) -> Result<Option<Message>> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput(
                "message content cannot be empty".to_string(),
            ));
        }

        let edited = self.backend.edit_message(id, content)?;
        if let Some(ref message) = edited {
            cached::invalidate(self.cache.as_ref(), &[keys::message(id)]);
            cached::invalidate_prefixes(
                self.cache.as_ref(),
                &[keys::message_list_prefix(&message.conversation_id)],
            );
        }
        Ok(edited)
    }

    /// Deletes a message (soft by default in the API layer above) and
    /// invalidates the message, its lists, and the recounted parent.
    pub fn delete(&self, id: &MessageId, soft: bool) -> Result<bool> {
        // Fetch first: the conversation is needed for dependent keys.
        let message = self.backend.get_message(id)?;
        let deleted = self.backend.delete_message(id, soft)?;
        if deleted {
            cached::invalidate(self.cache.as_ref(), &[keys::message(id)]);
            if let Some(ref message) = message {
                self.invalidate_for_conversation(&message.conversation_id);
            }
        }
        Ok(deleted)
    }

    /// The sequence number the next append would receive.
    pub fn next_sequence_number(&self, conversation_id: &ConversationId) -> Result<i64> {
        self.backend.next_sequence_number(conversation_id)
    }

    /// Drops every cache entry a message write can make stale: the
    /// conversation's message lists, the conversation entry (its
    /// `message_count` changed), and the owner's conversation lists.
    fn invalidate_for_conversation(&self, conversation_id: &ConversationId) {
        cached::invalidate(
            self.cache.as_ref(),
            &[keys::conversation(conversation_id)],
        );
        let mut prefixes = vec![keys::message_list_prefix(conversation_id)];
        match self.backend.get_conversation(conversation_id) {
            Ok(Some(conversation)) => {
                prefixes.push(keys::conversation_list_prefix(&conversation.user_id));
            },
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "could not resolve owner for list invalidation"
                );
            },
        }
        cached::invalidate_prefixes(self.cache.as_ref(), &prefixes);
    }
}

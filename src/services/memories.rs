//! Cache-aside memory service.

use super::cached;
use crate::cache::{CacheBackend, keys};
use crate::models::{
    ConversationId, MemoryFact, MemoryId, MemoryPatch, NewMemory, Page, UserId,
};
use crate::storage::{MemoryStore, StorageBackend};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Memory-fact operations with a read-through cache.
#[derive(Clone)]
pub struct MemoryService {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl MemoryService {
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

    /// Learns a fact. Importance is clamped into `[0.0, 1.0]`, never
    /// rejected; tags are lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty question or answer.
    pub fn learn(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
        question: &str,
        answer: &str,
        importance: f64,
        tags: &[String],
    ) -> Result<MemoryFact> {
        if question.trim().is_empty() {
            return Err(Error::InvalidInput("question cannot be empty".to_string()));
        }
        if answer.trim().is_empty() {
            return Err(Error::InvalidInput("answer cannot be empty".to_string()));
        }

        let memory = self.backend.create_memory(NewMemory {
            user_id: user_id.clone(),
            conversation_id: conversation_id.cloned(),
            question: question.to_string(),
            answer: answer.to_string(),
            importance,
            tags: tags.to_vec(),
        })?;
        cached::invalidate_prefixes(self.cache.as_ref(), &[keys::memory_list_prefix(user_id)]);
        Ok(memory)
    }

    /// Fetches a fact through the cache.
    pub fn get(&self, id: &MemoryId) -> Result<Option<MemoryFact>> {
        cached::read_through(self.cache.as_ref(), &keys::memory(id), self.ttl, || {
            self.backend.get_memory(id)
        })
    }

    /// Lists a user's facts, most important first, through the cache.
    pub fn recall(&self, user_id: &UserId, page: &Page) -> Result<Vec<MemoryFact>> {
        let key = keys::memory_list(user_id, &page.canonical());
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.list_memories(user_id, page)
        })
    }

    /// Substring search over question/answer text, cached under the user's
    /// list prefix.
    pub fn search(&self, user_id: &UserId, query: &str, page: &Page) -> Result<Vec<MemoryFact>> {
        let params = format!("q={query};{}", page.canonical());
        let key = keys::memory_list(user_id, &params);
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.search_memories(user_id, query, page)
        })
    }

    /// Facts sharing at least one of the given tags.
    pub fn with_tags(&self, user_id: &UserId, tags: &[String], page: &Page) -> Result<Vec<MemoryFact>> {
        let params = format!("t={};{}", tags.join(","), page.canonical());
        let key = keys::memory_list(user_id, &params);
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.memories_with_tags(user_id, tags, page)
        })
    }

    /// Applies a patch (clamping and normalizing on the way) and invalidates.
    pub fn update(&self, id: &MemoryId, patch: MemoryPatch) -> Result<Option<MemoryFact>> {
        let updated = self.backend.update_memory(id, patch)?;
        if let Some(ref memory) = updated {
            self.invalidate(memory);
        }
        Ok(updated)
    }

    /// Records a recall: bumps `access_count`, stamps `last_accessed`.
    pub fn touch(&self, id: &MemoryId) -> Result<bool> {
        let touched = self.backend.touch_memory(id)?;
        if touched && let Some(memory) = self.backend.get_memory(id)? {
            self.invalidate(&memory);
        }
        Ok(touched)
    }

    /// Forgets a fact.
    pub fn forget(&self, id: &MemoryId) -> Result<bool> {
        let memory = self.backend.get_memory(id)?;
        let deleted = self.backend.delete_memory(id)?;
        if deleted {
            cached::invalidate(self.cache.as_ref(), &[keys::memory(id)]);
            if let Some(ref memory) = memory {
                cached::invalidate_prefixes(
                    self.cache.as_ref(),
                    &[keys::memory_list_prefix(&memory.user_id)],
                );
            }
        }
        Ok(deleted)
    }

    fn invalidate(&self, memory: &MemoryFact) {
        cached::invalidate(self.cache.as_ref(), &[keys::memory(&memory.id)]);
        cached::invalidate_prefixes(
            self.cache.as_ref(),
            &[keys::memory_list_prefix(&memory.user_id)],
        );
    }
}

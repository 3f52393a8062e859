//! Cache-aside uploaded-file service.

use super::cached;
use crate::cache::{CacheBackend, keys};
use crate::models::{ConversationId, FileId, NewUpload, Page, UploadedFile, UserId};
use crate::storage::{StorageBackend, UploadStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Uploaded-file metadata operations with a read-through cache.
#[derive(Clone)]
pub struct UploadService {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl UploadService {
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

    /// Registers an uploaded file's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty filename or a negative
    /// size.
    pub fn register(&self, new: NewUpload) -> Result<UploadedFile> {
        if new.filename.trim().is_empty() {
            return Err(Error::InvalidInput("filename cannot be empty".to_string()));
        }
        if new.file_size < 0 {
            return Err(Error::InvalidInput(
                "file size cannot be negative".to_string(),
            ));
        }

        let upload = self.backend.create_upload(new)?;
        self.invalidate_lists(&upload);
        Ok(upload)
    }

    /// Fetches upload metadata through the cache.
    pub fn get(&self, id: &FileId) -> Result<Option<UploadedFile>> {
        cached::read_through(self.cache.as_ref(), &keys::upload(id), self.ttl, || {
            self.backend.get_upload(id)
        })
    }

    /// Lists a conversation's uploads through the cache.
    pub fn for_conversation(
        &self,
        conversation_id: &ConversationId,
        page: &Page,
    ) -> Result<Vec<UploadedFile>> {
        let key = format!(
            "{}{}",
            keys::upload_list_prefix(conversation_id),
            keys::params_digest(&page.canonical())
        );
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.list_uploads_for_conversation(conversation_id, page)
        })
    }

    /// Lists a user's uploads through the cache.
    pub fn for_user(&self, user_id: &UserId, page: &Page) -> Result<Vec<UploadedFile>> {
        let key = format!(
            "{}{}",
            keys::upload_user_list_prefix(user_id),
            keys::params_digest(&page.canonical())
        );
        cached::read_through_list(self.cache.as_ref(), &key, self.ttl, || {
            self.backend.list_uploads_for_user(user_id, page)
        })
    }

    /// Stores the analysis result, flips `is_processed`, and invalidates.
    pub fn mark_processed(
        &self,
        id: &FileId,
        analysis: serde_json::Value,
    ) -> Result<Option<UploadedFile>> {
        let updated = self.backend.mark_processed(id, analysis)?;
        if let Some(ref upload) = updated {
            cached::invalidate(self.cache.as_ref(), &[keys::upload(id)]);
            self.invalidate_lists(upload);
        }
        Ok(updated)
    }

    /// Removes an upload record and invalidates.
    pub fn delete(&self, id: &FileId) -> Result<bool> {
        let upload = self.backend.get_upload(id)?;
        let deleted = self.backend.delete_upload(id)?;
        if deleted {
            cached::invalidate(self.cache.as_ref(), &[keys::upload(id)]);
            if let Some(ref upload) = upload {
                self.invalidate_lists(upload);
            }
        }
        Ok(deleted)
    }

    fn invalidate_lists(&self, upload: &UploadedFile) {
        cached::invalidate_prefixes(
            self.cache.as_ref(),
            &[
                keys::upload_list_prefix(&upload.conversation_id),
                keys::upload_user_list_prefix(&upload.user_id),
            ],
        );
    }
}

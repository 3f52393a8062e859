//! API key service.
//!
//! Keys authenticate callers, so reads here go straight to storage: caching
//! a credential check would trade a millisecond for a revocation window.
//! The plaintext secret exists only in the [`crate::models::GeneratedKey`]
//! returned from [`ApiKeyService::generate`]; storage holds a SHA-256 digest.

use crate::models::{
    ApiKey, ApiKeyId, GeneratedKey, NewApiKey, UserId, api_key_prefix, hash_api_key,
};
use crate::storage::{ApiKeyStore, StorageBackend};
use crate::{Error, Result};
use std::sync::Arc;

/// API key generation, validation, and revocation.
#[derive(Clone)]
pub struct ApiKeyService {
    backend: Arc<dyn StorageBackend>,
}

impl ApiKeyService {
    /// Builds the service from an injected backend. Usually obtained from
    /// [`super::Store`] instead.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Generates a key for a user. The returned plaintext is shown once and
    /// never stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty label.
    pub fn generate(&self, user_id: &UserId, label: &str) -> Result<GeneratedKey> {
        if label.trim().is_empty() {
            return Err(Error::InvalidInput("label cannot be empty".to_string()));
        }

        let plaintext = format!(
            "ck_{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let record = self.backend.create_api_key(NewApiKey {
            user_id: user_id.clone(),
            label: label.to_string(),
            prefix: api_key_prefix(&plaintext),
            key_hash: hash_api_key(&plaintext),
        })?;

        Ok(GeneratedKey { record, plaintext })
    }

    /// Validates a plaintext key: returns the record when the digest matches
    /// an unrevoked key, `None` otherwise. A successful validation stamps
    /// `last_used_at`.
    pub fn validate(&self, plaintext: &str) -> Result<Option<ApiKey>> {
        let Some(key) = self.backend.find_api_key_by_hash(&hash_api_key(plaintext))? else {
            return Ok(None);
        };
        if !key.is_active() {
            return Ok(None);
        }

        self.backend.touch_api_key(&key.id)?;
        Ok(Some(key))
    }

    /// Revokes a key. Idempotent; a revoked key never validates again.
    pub fn revoke(&self, id: &ApiKeyId) -> Result<bool> {
        self.backend.revoke_api_key(id)
    }

    /// Fetches a key record by ID.
    pub fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>> {
        self.backend.get_api_key(id)
    }

    /// Lists a user's keys, newest first.
    pub fn list(&self, user_id: &UserId) -> Result<Vec<ApiKey>> {
        self.backend.list_api_keys(user_id)
    }
}

//! API keys for service authentication.
//!
//! Only a SHA-256 digest of the secret is stored; the plaintext is returned
//! exactly once at generation time. Validation looks the digest up and
//! rejects revoked keys.

use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of leading plaintext characters kept as a displayable prefix.
const PREFIX_LEN: usize = 11;

/// Computes the hex-encoded SHA-256 digest of an API key secret.
#[must_use]
pub fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the displayable prefix of a plaintext key (e.g. `ck_a1b2c3d4`).
#[must_use]
pub fn api_key_prefix(plaintext: &str) -> String {
    plaintext.chars().take(PREFIX_LEN).collect()
}

/// Unique identifier for an API key record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(String);

impl ApiKeyId {
    /// Creates an API key ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random API key ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ApiKeyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApiKeyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored API key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier.
    pub id: ApiKeyId,
    /// Owning user.
    pub user_id: UserId,
    /// Human-readable label ("CI token", "mobile app").
    pub label: String,
    /// Displayable plaintext prefix.
    pub prefix: String,
    /// Hex-encoded SHA-256 digest of the full secret.
    pub key_hash: String,
    /// When the key was last used to authenticate.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Revocation marker; a revoked key never validates again.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether the key is still usable.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Fields for storing a generated API key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    /// Owning user.
    pub user_id: UserId,
    /// Human-readable label.
    pub label: String,
    /// Displayable plaintext prefix.
    pub prefix: String,
    /// Hex-encoded SHA-256 digest of the full secret.
    pub key_hash: String,
}

impl NewApiKey {
    /// Materializes a full [`ApiKey`] record.
    #[must_use]
    pub fn into_api_key(self, now: DateTime<Utc>) -> ApiKey {
        ApiKey {
            id: ApiKeyId::generate(),
            user_id: self.user_id,
            label: self.label,
            prefix: self.prefix,
            key_hash: self.key_hash,
            last_used_at: None,
            revoked_at: None,
            created_at: now,
        }
    }
}

/// A freshly generated key: the stored record plus the one-time plaintext.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// The persisted record.
    pub record: ApiKey,
    /// The plaintext secret. Not stored anywhere; hand it to the caller once.
    pub plaintext: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_hex() {
        let a = hash_api_key("ck_secret");
        let b = hash_api_key("ck_secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_api_key("ck_other"));
    }

    #[test]
    fn test_prefix_is_displayable_slice() {
        assert_eq!(api_key_prefix("ck_a1b2c3d4e5f6"), "ck_a1b2c3d4");
    }
}

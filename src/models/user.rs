//! User identity and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random user ID.
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

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered user.
///
/// Users own conversations, memories, and uploaded files. Deleting a user is
/// a soft delete by default (`deleted_at` set, row retained); owned entities
/// are not cascaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Optional email address, unique when present.
    pub email: Option<String>,
    /// Optional display name.
    pub full_name: Option<String>,
    /// Whether the account is active.
    pub is_active: bool,
    /// Whether the account has administrative rights.
    pub is_admin: bool,
    /// Timestamp of the most recent login.
    pub last_login: Option<DateTime<Utc>>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    /// Unique login name.
    pub username: String,
    /// Optional email address.
    pub email: Option<String>,
    /// Optional display name.
    pub full_name: Option<String>,
    /// Whether the account has administrative rights.
    pub is_admin: bool,
}

impl NewUser {
    /// Materializes a full [`User`] with a generated ID and timestamps.
    #[must_use]
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: UserId::generate(),
            username: self.username,
            email: self.email,
            full_name: self.full_name,
            is_active: true,
            is_admin: self.is_admin,
            last_login: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a user. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    /// New email address.
    pub email: Option<String>,
    /// New display name.
    pub full_name: Option<String>,
    /// New active flag.
    pub is_active: Option<bool>,
    /// New admin flag.
    pub is_admin: Option<bool>,
}

impl UserPatch {
    /// Applies the patch in place, refreshing `updated_at`.
    pub fn apply(self, user: &mut User, now: DateTime<Utc>) {
        if let Some(email) = self.email {
            user.email = Some(email);
        }
        if let Some(full_name) = self.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(is_admin) = self.is_admin {
            user.is_admin = is_admin;
        }
        user.updated_at = now;
    }
}

//! Uploaded-file metadata.
//!
//! Only metadata lives here; the bytes themselves are handled elsewhere.
//! `analysis_result` is populated once asynchronous processing finishes.

use super::conversation::ConversationId;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Creates a file ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random file ID.
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

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata for a file uploaded into a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Unique identifier.
    pub id: FileId,
    /// Uploading user.
    pub user_id: UserId,
    /// Conversation the file belongs to.
    pub conversation_id: ConversationId,
    /// Original filename.
    pub filename: String,
    /// Location of the stored bytes.
    pub file_path: String,
    /// MIME type or extension tag.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Whether async processing has completed.
    pub is_processed: bool,
    /// Processing output, present once `is_processed` is set.
    pub analysis_result: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields for registering an uploaded file.
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Uploading user.
    pub user_id: UserId,
    /// Conversation the file belongs to.
    pub conversation_id: ConversationId,
    /// Original filename.
    pub filename: String,
    /// Location of the stored bytes.
    pub file_path: String,
    /// MIME type or extension tag.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: i64,
}

impl NewUpload {
    /// Materializes a full [`UploadedFile`] with a generated ID and timestamps.
    #[must_use]
    pub fn into_upload(self, now: DateTime<Utc>) -> UploadedFile {
        UploadedFile {
            id: FileId::generate(),
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            filename: self.filename,
            file_path: self.file_path,
            file_type: self.file_type,
            file_size: self.file_size,
            is_processed: false,
            analysis_result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

//! Message types, roles, and edit history.

use super::conversation::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random message ID.
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

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human participant.
    #[default]
    User,
    /// Model-generated reply.
    Assistant,
    /// System/context injection.
    System,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parses a role string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prior content revision of an edited message.
///
/// The edit history is append-only: each edit pushes the content being
/// replaced, so the list reads oldest-first and is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    /// Content before the edit.
    pub content: String,
    /// When the edit happened.
    pub edited_at: DateTime<Utc>,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Model that produced the message, for assistant messages.
    pub model: Option<String>,
    /// Position within the conversation: unique and increasing, assigned as
    /// `max(existing) + 1` when not supplied explicitly.
    pub sequence_number: i64,
    /// Whether the message has been edited at least once.
    pub is_edited: bool,
    /// Prior contents, oldest edit first.
    pub edit_history: Vec<EditRecord>,
    /// Soft-delete marker. Soft-deleted messages are excluded from listings
    /// and from the conversation recount.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Records an edit, appending the current content to the history.
    pub fn record_edit(&mut self, new_content: String, now: DateTime<Utc>) {
        self.edit_history.push(EditRecord {
            content: std::mem::replace(&mut self.content, new_content),
            edited_at: now,
        });
        self.is_edited = true;
        self.updated_at = now;
    }
}

/// Fields for appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Producing model, if any.
    pub model: Option<String>,
    /// Explicit sequence number. Leave `None` to have the store assign the
    /// next free one; an explicit collision is a conflict.
    pub sequence_number: Option<i64>,
}

impl NewMessage {
    /// Materializes a full [`Message`] with the given sequence number.
    #[must_use]
    pub fn into_message(self, sequence_number: i64, now: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::generate(),
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            model: self.model,
            sequence_number,
            is_edited: false,
            edit_history: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

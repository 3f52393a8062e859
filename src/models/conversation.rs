//! Conversation types and list filters.

use super::memory::normalize_tags;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a conversation (UUID, stable external identifier).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random conversation ID.
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

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A chat session owned by a user.
///
/// `message_count` is denormalized: it is maintained by an explicit recount
/// after every message insert or delete, never by a storage trigger. Deleting
/// a conversation cascades to its messages, memories, and uploaded files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Owning user.
    pub user_id: UserId,
    /// Display title.
    pub title: String,
    /// Tags, lowercased at write time.
    pub tags: Vec<String>,
    /// Whether the conversation is archived.
    pub is_archived: bool,
    /// Whether the conversation is pinned.
    pub is_pinned: bool,
    /// Denormalized count of non-deleted messages.
    pub message_count: i64,
    /// Free-form metadata object.
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a conversation.
#[derive(Debug, Clone)]
pub struct NewConversation {
    /// Owning user.
    pub user_id: UserId,
    /// Display title.
    pub title: String,
    /// Tags (normalized to lowercase on materialization).
    pub tags: Vec<String>,
    /// Free-form metadata; defaults to an empty object.
    pub metadata: Option<serde_json::Value>,
}

impl NewConversation {
    /// Materializes a full [`Conversation`] with a generated ID and timestamps.
    #[must_use]
    pub fn into_conversation(self, now: DateTime<Utc>) -> Conversation {
        Conversation {
            id: ConversationId::generate(),
            user_id: self.user_id,
            title: self.title,
            tags: normalize_tags(&self.tags),
            is_archived: false,
            is_pinned: false,
            message_count: 0,
            metadata: self
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a conversation. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    /// New title.
    pub title: Option<String>,
    /// Replacement tag list (normalized to lowercase).
    pub tags: Option<Vec<String>>,
    /// New archived flag.
    pub is_archived: Option<bool>,
    /// New pinned flag.
    pub is_pinned: Option<bool>,
    /// Replacement metadata object.
    pub metadata: Option<serde_json::Value>,
}

impl ConversationPatch {
    /// Applies the patch in place, refreshing `updated_at`.
    pub fn apply(self, conversation: &mut Conversation, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            conversation.title = title;
        }
        if let Some(tags) = self.tags {
            conversation.tags = normalize_tags(&tags);
        }
        if let Some(is_archived) = self.is_archived {
            conversation.is_archived = is_archived;
        }
        if let Some(is_pinned) = self.is_pinned {
            conversation.is_pinned = is_pinned;
        }
        if let Some(metadata) = self.metadata {
            conversation.metadata = metadata;
        }
        conversation.updated_at = now;
    }
}

/// Filter for conversation listings. Conditions are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    /// Restrict to conversations owned by this user.
    pub user_id: Option<UserId>,
    /// Restrict by archived flag.
    pub is_archived: Option<bool>,
    /// Restrict by pinned flag.
    pub is_pinned: Option<bool>,
    /// Restrict to conversations carrying this tag (matched lowercased).
    pub tag: Option<String>,
    /// Restrict to titles containing this substring (case-insensitive).
    pub title_contains: Option<String>,
}

impl ConversationFilter {
    /// Filter for all conversations of one user.
    #[must_use]
    pub fn for_user(user_id: &UserId) -> Self {
        Self {
            user_id: Some(user_id.clone()),
            ..Self::default()
        }
    }

    /// Returns a stable string form of the filter, used for cache keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "u={};a={};p={};t={};q={}",
            self.user_id.as_ref().map_or("", UserId::as_str),
            self.is_archived.map_or_else(String::new, |v| v.to_string()),
            self.is_pinned.map_or_else(String::new, |v| v.to_string()),
            self.tag.as_deref().unwrap_or(""),
            self.title_contains.as_deref().unwrap_or(""),
        )
    }

    /// In-memory evaluation of the filter, used by the document backend.
    #[must_use]
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(ref user_id) = self.user_id
            && conversation.user_id != *user_id
        {
            return false;
        }
        if let Some(archived) = self.is_archived
            && conversation.is_archived != archived
        {
            return false;
        }
        if let Some(pinned) = self.is_pinned
            && conversation.is_pinned != pinned
        {
            return false;
        }
        if let Some(ref tag) = self.tag {
            let needle = tag.to_lowercase();
            if !conversation.tags.iter().any(|t| *t == needle) {
                return false;
            }
        }
        if let Some(ref fragment) = self.title_contains
            && !conversation
                .title
                .to_lowercase()
                .contains(&fragment.to_lowercase())
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        NewConversation {
            user_id: UserId::new("u1"),
            title: "Rust questions".to_string(),
            tags: vec!["Rust".to_string(), "CODING".to_string()],
            metadata: None,
        }
        .into_conversation(Utc::now())
    }

    #[test]
    fn test_tags_lowercased_on_create() {
        let conv = sample();
        assert_eq!(conv.tags, vec!["rust", "coding"]);
    }

    #[test]
    fn test_filter_matches_tag_and_title() {
        let conv = sample();

        let filter = ConversationFilter {
            user_id: Some(UserId::new("u1")),
            tag: Some("RUST".to_string()),
            title_contains: Some("rust".to_string()),
            ..ConversationFilter::default()
        };
        assert!(filter.matches(&conv));

        let wrong_user = ConversationFilter::for_user(&UserId::new("u2"));
        assert!(!wrong_user.matches(&conv));
    }

    #[test]
    fn test_filter_canonical_is_stable() {
        let filter = ConversationFilter::for_user(&UserId::new("u1"));
        assert_eq!(filter.canonical(), ConversationFilter::for_user(&UserId::new("u1")).canonical());
    }

    #[test]
    fn test_patch_toggles_are_independent() {
        let mut conv = sample();
        let now = Utc::now();

        ConversationPatch {
            is_pinned: Some(true),
            ..ConversationPatch::default()
        }
        .apply(&mut conv, now);
        assert!(conv.is_pinned);
        assert!(!conv.is_archived);

        ConversationPatch {
            is_archived: Some(true),
            ..ConversationPatch::default()
        }
        .apply(&mut conv, now);
        assert!(conv.is_pinned);
        assert!(conv.is_archived);
    }
}

//! Learned memory facts.
//!
//! A memory is a question/answer pair the assistant has learned about a user,
//! optionally bound to the conversation it was learned in. Importance is a
//! bounded score: out-of-range writes are clamped, never rejected.

use super::conversation::ConversationId;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lower bound of the importance score.
pub const IMPORTANCE_MIN: f64 = 0.0;

/// Upper bound of the importance score.
pub const IMPORTANCE_MAX: f64 = 1.0;

/// Clamps an importance score into the canonical `[0.0, 1.0]` range.
///
/// Non-finite inputs land on the lower bound.
#[must_use]
pub fn clamp_importance(value: f64) -> f64 {
    if value.is_nan() {
        return IMPORTANCE_MIN;
    }
    value.clamp(IMPORTANCE_MIN, IMPORTANCE_MAX)
}

/// Lowercases a tag list, preserving order and dropping empty entries.
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Unique identifier for a memory fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a memory ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random memory ID.
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

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A learned question/answer fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning user.
    pub user_id: UserId,
    /// Conversation the fact was learned in, if any.
    pub conversation_id: Option<ConversationId>,
    /// The question or trigger.
    pub question: String,
    /// The learned answer.
    pub answer: String,
    /// Bounded relevance score in `[0.0, 1.0]`.
    pub importance: f64,
    /// Tags, lowercased at write time.
    pub tags: Vec<String>,
    /// How many times the fact has been recalled.
    pub access_count: i64,
    /// When the fact was last recalled.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a memory fact.
#[derive(Debug, Clone)]
pub struct NewMemory {
    /// Owning user.
    pub user_id: UserId,
    /// Conversation the fact was learned in, if any.
    pub conversation_id: Option<ConversationId>,
    /// The question or trigger.
    pub question: String,
    /// The learned answer.
    pub answer: String,
    /// Relevance score; clamped into `[0.0, 1.0]` on materialization.
    pub importance: f64,
    /// Tags (normalized to lowercase on materialization).
    pub tags: Vec<String>,
}

impl NewMemory {
    /// Materializes a full [`MemoryFact`] with a generated ID and timestamps.
    #[must_use]
    pub fn into_memory(self, now: DateTime<Utc>) -> MemoryFact {
        MemoryFact {
            id: MemoryId::generate(),
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            question: self.question,
            answer: self.answer,
            importance: clamp_importance(self.importance),
            tags: normalize_tags(&self.tags),
            access_count: 0,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a memory fact. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    /// New question text.
    pub question: Option<String>,
    /// New answer text.
    pub answer: Option<String>,
    /// New importance (clamped on apply).
    pub importance: Option<f64>,
    /// Replacement tag list (normalized on apply).
    pub tags: Option<Vec<String>>,
}

impl MemoryPatch {
    /// Applies the patch in place, refreshing `updated_at`.
    pub fn apply(self, memory: &mut MemoryFact, now: DateTime<Utc>) {
        if let Some(question) = self.question {
            memory.question = question;
        }
        if let Some(answer) = self.answer {
            memory.answer = answer;
        }
        if let Some(importance) = self.importance {
            memory.importance = clamp_importance(importance);
        }
        if let Some(tags) = self.tags {
            memory.tags = normalize_tags(&tags);
        }
        memory.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1.5, 1.0; "above upper bound")]
    #[test_case(-0.5, 0.0; "below lower bound")]
    #[test_case(0.42, 0.42; "in range")]
    #[test_case(f64::NAN, 0.0; "nan lands on floor")]
    fn test_clamp_importance(input: f64, expected: f64) {
        assert!((clamp_importance(input) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalize_tags_preserves_order() {
        let tags = vec![
            "Python".to_string(),
            "CODING".to_string(),
            "  ".to_string(),
            "ml".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["python", "coding", "ml"]);
    }

    #[test]
    fn test_into_memory_clamps_and_normalizes() {
        let fact = NewMemory {
            user_id: UserId::new("u1"),
            conversation_id: None,
            question: "favorite language?".to_string(),
            answer: "Rust".to_string(),
            importance: 7.5,
            tags: vec!["Preference".to_string()],
        }
        .into_memory(Utc::now());

        assert!((fact.importance - 1.0).abs() < f64::EPSILON);
        assert_eq!(fact.tags, vec!["preference"]);
        assert_eq!(fact.access_count, 0);
    }
}

//! Row conversion for the `SQLite` backend.
//!
//! Each entity has a fixed SELECT column list and a matching `*_from_row`
//! function, shared by point lookups and list queries so the two can never
//! drift apart. Lenient parsing mirrors the storage philosophy: a malformed
//! enum or JSON column degrades to a default rather than poisoning the whole
//! row.

use crate::models::{
    ApiKey, ApiKeyId, Conversation, ConversationId, EditRecord, FileId, MemoryFact, MemoryId,
    Message, MessageId, Role, UploadedFile, User, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// SELECT list matching [`user_from_row`].
pub const USER_COLUMNS: &str = "id, username, email, full_name, is_active, is_admin, \
     last_login, deleted_at, created_at, updated_at";

/// SELECT list matching [`conversation_from_row`].
pub const CONVERSATION_COLUMNS: &str = "id, user_id, title, tags, is_archived, is_pinned, \
     message_count, metadata, created_at, updated_at";

/// SELECT list matching [`message_from_row`].
pub const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, model, sequence_number, \
     is_edited, edit_history, deleted_at, created_at, updated_at";

/// SELECT list matching [`memory_from_row`].
pub const MEMORY_COLUMNS: &str = "id, user_id, conversation_id, question, answer, importance, \
     tags, access_count, last_accessed, created_at, updated_at";

/// SELECT list matching [`upload_from_row`].
pub const UPLOAD_COLUMNS: &str = "id, user_id, conversation_id, filename, file_path, file_type, \
     file_size, is_processed, analysis_result, created_at, updated_at";

/// SELECT list matching [`api_key_from_row`].
pub const API_KEY_COLUMNS: &str =
    "id, user_id, label, prefix, key_hash, last_used_at, revoked_at, created_at";

/// Joins tags into the stored comma-separated form.
pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

/// Splits the stored comma-separated tag column.
pub fn split_tags(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::new(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        is_active: row.get(4)?,
        is_admin: row.get(5)?,
        last_login: row.get::<_, Option<DateTime<Utc>>>(6)?,
        deleted_at: row.get::<_, Option<DateTime<Utc>>>(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let tags: String = row.get(3)?;
    let metadata: String = row.get(7)?;
    Ok(Conversation {
        id: ConversationId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        title: row.get(2)?,
        tags: split_tags(&tags),
        is_archived: row.get(4)?,
        is_pinned: row.get(5)?,
        message_count: row.get(6)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let edit_history: String = row.get(7)?;
    Ok(Message {
        id: MessageId::new(row.get::<_, String>(0)?),
        conversation_id: ConversationId::new(row.get::<_, String>(1)?),
        role: Role::parse(&role).unwrap_or_default(),
        content: row.get(3)?,
        model: row.get(4)?,
        sequence_number: row.get(5)?,
        is_edited: row.get(6)?,
        edit_history: serde_json::from_str::<Vec<EditRecord>>(&edit_history).unwrap_or_default(),
        deleted_at: row.get::<_, Option<DateTime<Utc>>>(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryFact> {
    let tags: String = row.get(6)?;
    Ok(MemoryFact {
        id: MemoryId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        conversation_id: row
            .get::<_, Option<String>>(2)?
            .map(ConversationId::new),
        question: row.get(3)?,
        answer: row.get(4)?,
        importance: row.get(5)?,
        tags: split_tags(&tags),
        access_count: row.get(7)?,
        last_accessed: row.get::<_, Option<DateTime<Utc>>>(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<UploadedFile> {
    let analysis: Option<String> = row.get(8)?;
    Ok(UploadedFile {
        id: FileId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        conversation_id: ConversationId::new(row.get::<_, String>(2)?),
        filename: row.get(3)?,
        file_path: row.get(4)?,
        file_type: row.get(5)?,
        file_size: row.get(6)?,
        is_processed: row.get(7)?,
        analysis_result: analysis.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn api_key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: ApiKeyId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        label: row.get(2)?,
        prefix: row.get(3)?,
        key_hash: row.get(4)?,
        last_used_at: row.get::<_, Option<DateTime<Utc>>>(5)?,
        revoked_at: row.get::<_, Option<DateTime<Utc>>>(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let tags = vec!["rust".to_string(), "coding".to_string()];
        assert_eq!(split_tags(&join_tags(&tags)), tags);
        assert_eq!(split_tags(""), Vec::<String>::new());
        assert_eq!(split_tags(" a ,, b "), vec!["a", "b"]);
    }
}

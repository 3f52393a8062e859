//! JSON-file document backend.
//!
//! The document adapter: one pretty-printed JSON file per entity under
//! per-collection directories. Same repository contract and semantics as the
//! `SQLite` adapter, with queries answered by directory scans. Suited to
//! small deployments and tests; the relational adapter is the default.
//!
//! # Security
//!
//! - **Path traversal**: entity IDs are validated before touching the
//!   filesystem, so an ID can never escape its collection directory
//! - **File size limit**: oversized files are refused at read time to
//!   prevent memory exhaustion
//!
//! # Concurrency
//!
//! A single coarse write lock serializes mutations. Sequence assignment,
//! uniqueness checks, and the message recount all need a consistent view of
//! the collection, and a directory of JSON files offers no finer-grained
//! primitive to build on.

use crate::models::{
    ApiKey, ApiKeyId, Conversation, ConversationFilter, ConversationId, ConversationPatch, FileId,
    MemoryFact, MemoryId, MemoryPatch, Message, MessageId, NewApiKey, NewConversation, NewMemory,
    NewMessage, NewUpload, NewUser, Page, SortOrder, UploadedFile, User, UserId, UserPatch,
};
use crate::storage::traits::{
    ApiKeyStore, ConversationStore, MemoryStore, MessageStore, UploadStore, UserStore,
};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Maximum size of a single entity file (4 MiB).
const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

const USERS: &str = "users";
const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const MEMORIES: &str = "memories";
const UPLOADS: &str = "uploaded_files";
const API_KEYS: &str = "api_keys";

/// Rejects IDs that could escape the collection directory.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
        || id.contains("..")
    {
        return Err(Error::InvalidInput(format!(
            "identifier {id:?} is not filesystem-safe"
        )));
    }
    Ok(())
}

/// Filesystem-backed document store.
pub struct DocumentBackend {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl DocumentBackend {
    /// Opens (and creates, if needed) a document store rooted at `base_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection directories cannot be created.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        for collection in [USERS, CONVERSATIONS, MESSAGES, MEMORIES, UPLOADS, API_KEYS] {
            fs::create_dir_all(base_path.join(collection))
                .map_err(|e| Error::storage("create_collection_dir", e))?;
        }
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("document store write lock was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    fn entity_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.base_path.join(collection).join(format!("{id}.json")))
    }

    fn read<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        let path = self.entity_path(collection, id)?;
        read_file(&path)
    }

    fn write<T: Serialize>(&self, collection: &str, id: &str, entity: &T) -> Result<()> {
        let path = self.entity_path(collection, id)?;
        let json = serde_json::to_string_pretty(entity)
            .map_err(|e| Error::storage("encode_entity", e))?;
        fs::write(&path, json).map_err(|e| Error::storage("write_entity", e))
    }

    fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        let path = self.entity_path(collection, id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage("remove_entity", e)),
        }
    }

    /// Reads every entity in a collection. Queries are scans here.
    fn scan<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let dir = self.base_path.join(collection);
        let entries = fs::read_dir(&dir).map_err(|e| Error::storage("read_collection_dir", e))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage("read_collection_dir", e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(item) = read_file(&path)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage("stat_entity", e)),
    };
    if metadata.len() > MAX_FILE_SIZE {
        return Err(Error::storage(
            "read_entity",
            format!("{} exceeds the {MAX_FILE_SIZE} byte limit", path.display()),
        ));
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage("read_entity", e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::storage("decode_entity", e))
}

/// Sorts ascending by the given key, applies direction, then the page window.
fn apply_page<T, K: Ord>(mut items: Vec<T>, page: &Page, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(&key);
    if page.order == SortOrder::Desc {
        items.reverse();
    }
    items
        .into_iter()
        .skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
        .take(page.effective_limit() as usize)
        .collect()
}

impl UserStore for DocumentBackend {
    fn create_user(&self, new: NewUser) -> Result<User> {
        let _guard = self.lock();
        let user = new.into_user(Utc::now());

        let existing: Vec<User> = self.scan(USERS)?;
        if existing.iter().any(|u| u.username == user.username) {
            return Err(Error::Conflict {
                field: "username".to_string(),
                value: user.username,
            });
        }
        if let Some(ref email) = user.email
            && existing.iter().any(|u| u.email.as_deref() == Some(email))
        {
            return Err(Error::Conflict {
                field: "email".to_string(),
                value: email.clone(),
            });
        }

        self.write(USERS, user.id.as_str(), &user)?;
        Ok(user)
    }

    fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.read(USERS, id.as_str())
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let users: Vec<User> = self.scan(USERS)?;
        Ok(users.into_iter().find(|u| u.username == username))
    }

    fn list_users(&self, page: &Page) -> Result<Vec<User>> {
        let users: Vec<User> = self.scan(USERS)?;
        let live = users.into_iter().filter(|u| u.deleted_at.is_none()).collect();
        Ok(apply_page(live, page, |u: &User| u.created_at))
    }

    fn update_user(&self, id: &UserId, patch: UserPatch) -> Result<Option<User>> {
        let _guard = self.lock();
        let Some(mut user) = self.read::<User>(USERS, id.as_str())? else {
            return Ok(None);
        };

        if let Some(ref email) = patch.email {
            let others: Vec<User> = self.scan(USERS)?;
            if others
                .iter()
                .any(|u| u.id != *id && u.email.as_deref() == Some(email))
            {
                return Err(Error::Conflict {
                    field: "email".to_string(),
                    value: email.clone(),
                });
            }
        }

        patch.apply(&mut user, Utc::now());
        self.write(USERS, id.as_str(), &user)?;
        Ok(Some(user))
    }

    fn delete_user(&self, id: &UserId, soft: bool) -> Result<bool> {
        let _guard = self.lock();
        if soft {
            let Some(mut user) = self.read::<User>(USERS, id.as_str())? else {
                return Ok(false);
            };
            if user.deleted_at.is_some() {
                return Ok(false);
            }
            let now = Utc::now();
            user.deleted_at = Some(now);
            user.is_active = false;
            user.updated_at = now;
            self.write(USERS, id.as_str(), &user)?;
            Ok(true)
        } else {
            self.remove(USERS, id.as_str())
        }
    }

    fn record_login(&self, id: &UserId) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut user) = self.read::<User>(USERS, id.as_str())? else {
            return Ok(false);
        };
        let now = Utc::now();
        user.last_login = Some(now);
        user.updated_at = now;
        self.write(USERS, id.as_str(), &user)?;
        Ok(true)
    }
}

impl ConversationStore for DocumentBackend {
    fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let conversation = new.into_conversation(Utc::now());
        self.write(CONVERSATIONS, conversation.id.as_str(), &conversation)?;
        Ok(conversation)
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        self.read(CONVERSATIONS, id.as_str())
    }

    fn list_conversations(
        &self,
        filter: &ConversationFilter,
        page: &Page,
    ) -> Result<Vec<Conversation>> {
        let conversations: Vec<Conversation> = self.scan(CONVERSATIONS)?;
        let matching = conversations
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        Ok(apply_page(matching, page, |c: &Conversation| c.updated_at))
    }

    fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>> {
        let _guard = self.lock();
        let Some(mut conversation) = self.read::<Conversation>(CONVERSATIONS, id.as_str())? else {
            return Ok(None);
        };
        patch.apply(&mut conversation, Utc::now());
        self.write(CONVERSATIONS, id.as_str(), &conversation)?;
        Ok(Some(conversation))
    }

    fn delete_conversation(&self, id: &ConversationId) -> Result<bool> {
        let _guard = self.lock();
        if !self.remove(CONVERSATIONS, id.as_str())? {
            return Ok(false);
        }

        // Cascade to owned entities by scan.
        let messages: Vec<Message> = self.scan(MESSAGES)?;
        for message in messages.iter().filter(|m| m.conversation_id == *id) {
            self.remove(MESSAGES, message.id.as_str())?;
        }
        let memories: Vec<MemoryFact> = self.scan(MEMORIES)?;
        for memory in memories
            .iter()
            .filter(|m| m.conversation_id.as_ref() == Some(id))
        {
            self.remove(MEMORIES, memory.id.as_str())?;
        }
        let uploads: Vec<UploadedFile> = self.scan(UPLOADS)?;
        for upload in uploads.iter().filter(|u| u.conversation_id == *id) {
            self.remove(UPLOADS, upload.id.as_str())?;
        }
        Ok(true)
    }

    fn recount_messages(&self, id: &ConversationId) -> Result<Option<i64>> {
        let _guard = self.lock();
        self.recount_locked(id)
    }
}

impl DocumentBackend {
    /// Recount while already holding the write lock.
    fn recount_locked(&self, id: &ConversationId) -> Result<Option<i64>> {
        let Some(mut conversation) = self.read::<Conversation>(CONVERSATIONS, id.as_str())? else {
            return Ok(None);
        };
        let messages: Vec<Message> = self.scan(MESSAGES)?;
        let count = i64::try_from(
            messages
                .iter()
                .filter(|m| m.conversation_id == *id && m.deleted_at.is_none())
                .count(),
        )
        .unwrap_or(i64::MAX);

        conversation.message_count = count;
        conversation.updated_at = Utc::now();
        self.write(CONVERSATIONS, id.as_str(), &conversation)?;
        Ok(Some(count))
    }

    fn next_sequence_locked(&self, conversation_id: &ConversationId) -> Result<i64> {
        let messages: Vec<Message> = self.scan(MESSAGES)?;
        let max = messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .map(|m| m.sequence_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn append_message_locked(&self, new: NewMessage) -> Result<Message> {
        if self
            .read::<Conversation>(CONVERSATIONS, new.conversation_id.as_str())?
            .is_none()
        {
            return Err(Error::InvalidInput(format!(
                "conversation {} does not exist",
                new.conversation_id
            )));
        }

        let sequence = match new.sequence_number {
            Some(explicit) => {
                let messages: Vec<Message> = self.scan(MESSAGES)?;
                if messages.iter().any(|m| {
                    m.conversation_id == new.conversation_id && m.sequence_number == explicit
                }) {
                    return Err(Error::Conflict {
                        field: "sequence_number".to_string(),
                        value: explicit.to_string(),
                    });
                }
                explicit
            },
            None => self.next_sequence_locked(&new.conversation_id)?,
        };

        let message = new.into_message(sequence, Utc::now());
        self.write(MESSAGES, message.id.as_str(), &message)?;
        self.recount_locked(&message.conversation_id)?;
        Ok(message)
    }
}

impl MessageStore for DocumentBackend {
    fn append_message(&self, new: NewMessage) -> Result<Message> {
        let _guard = self.lock();
        self.append_message_locked(new)
    }

    fn append_messages(&self, batch: Vec<NewMessage>) -> Result<Vec<Message>> {
        // Documents are written one at a time; a mid-batch failure leaves the
        // earlier writes applied, same as the relational adapter's chunks.
        let _guard = self.lock();
        let mut inserted = Vec::with_capacity(batch.len());
        for new in batch {
            inserted.push(self.append_message_locked(new)?);
        }
        Ok(inserted)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        self.read(MESSAGES, id.as_str())
    }

    fn list_messages(&self, conversation_id: &ConversationId, page: &Page) -> Result<Vec<Message>> {
        let messages: Vec<Message> = self.scan(MESSAGES)?;
        let live = messages
            .into_iter()
            .filter(|m| m.conversation_id == *conversation_id && m.deleted_at.is_none())
            .collect();
        Ok(apply_page(live, page, |m: &Message| m.sequence_number))
    }

    fn search_messages(
        &self,
        conversation_id: &ConversationId,
        needle: &str,
        page: &Page,
    ) -> Result<Vec<Message>> {
        let needle = needle.to_lowercase();
        let messages: Vec<Message> = self.scan(MESSAGES)?;
        let matching = messages
            .into_iter()
            .filter(|m| {
                m.conversation_id == *conversation_id
                    && m.deleted_at.is_none()
                    && m.content.to_lowercase().contains(&needle)
            })
            .collect();
        Ok(apply_page(matching, page, |m: &Message| m.sequence_number))
    }

    fn edit_message(&self, id: &MessageId, content: &str) -> Result<Option<Message>> {
        let _guard = self.lock();
        let Some(mut message) = self.read::<Message>(MESSAGES, id.as_str())? else {
            return Ok(None);
        };
        message.record_edit(content.to_string(), Utc::now());
        self.write(MESSAGES, id.as_str(), &message)?;
        Ok(Some(message))
    }

    fn delete_message(&self, id: &MessageId, soft: bool) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut message) = self.read::<Message>(MESSAGES, id.as_str())? else {
            return Ok(false);
        };

        let affected = if soft {
            if message.deleted_at.is_some() {
                false
            } else {
                let now = Utc::now();
                message.deleted_at = Some(now);
                message.updated_at = now;
                self.write(MESSAGES, id.as_str(), &message)?;
                true
            }
        } else {
            self.remove(MESSAGES, id.as_str())?
        };

        if affected {
            self.recount_locked(&message.conversation_id)?;
        }
        Ok(affected)
    }

    fn next_sequence_number(&self, conversation_id: &ConversationId) -> Result<i64> {
        let _guard = self.lock();
        self.next_sequence_locked(conversation_id)
    }
}

impl MemoryStore for DocumentBackend {
    fn create_memory(&self, new: NewMemory) -> Result<MemoryFact> {
        let memory = new.into_memory(Utc::now());
        self.write(MEMORIES, memory.id.as_str(), &memory)?;
        Ok(memory)
    }

    fn get_memory(&self, id: &MemoryId) -> Result<Option<MemoryFact>> {
        self.read(MEMORIES, id.as_str())
    }

    fn list_memories(&self, user_id: &UserId, page: &Page) -> Result<Vec<MemoryFact>> {
        let memories: Vec<MemoryFact> = self.scan(MEMORIES)?;
        let owned = memories
            .into_iter()
            .filter(|m| m.user_id == *user_id)
            .collect();
        // Importance is the natural ordering; NaN cannot occur because scores
        // are clamped at write time.
        Ok(apply_page(owned, page, |m: &MemoryFact| {
            (ordered_importance(m.importance), m.created_at)
        }))
    }

    fn search_memories(
        &self,
        user_id: &UserId,
        query: &str,
        page: &Page,
    ) -> Result<Vec<MemoryFact>> {
        let query = query.to_lowercase();
        let memories: Vec<MemoryFact> = self.scan(MEMORIES)?;
        let matching = memories
            .into_iter()
            .filter(|m| {
                m.user_id == *user_id
                    && (m.question.to_lowercase().contains(&query)
                        || m.answer.to_lowercase().contains(&query))
            })
            .collect();
        Ok(apply_page(matching, page, |m: &MemoryFact| {
            (ordered_importance(m.importance), m.created_at)
        }))
    }

    fn memories_with_tags(
        &self,
        user_id: &UserId,
        tags: &[String],
        page: &Page,
    ) -> Result<Vec<MemoryFact>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let memories: Vec<MemoryFact> = self.scan(MEMORIES)?;
        let matching = memories
            .into_iter()
            .filter(|m| {
                m.user_id == *user_id && m.tags.iter().any(|t| wanted.contains(t))
            })
            .collect();
        Ok(apply_page(matching, page, |m: &MemoryFact| {
            (ordered_importance(m.importance), m.created_at)
        }))
    }

    fn update_memory(&self, id: &MemoryId, patch: MemoryPatch) -> Result<Option<MemoryFact>> {
        let _guard = self.lock();
        let Some(mut memory) = self.read::<MemoryFact>(MEMORIES, id.as_str())? else {
            return Ok(None);
        };
        patch.apply(&mut memory, Utc::now());
        self.write(MEMORIES, id.as_str(), &memory)?;
        Ok(Some(memory))
    }

    fn touch_memory(&self, id: &MemoryId) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut memory) = self.read::<MemoryFact>(MEMORIES, id.as_str())? else {
            return Ok(false);
        };
        memory.access_count += 1;
        memory.last_accessed = Some(Utc::now());
        self.write(MEMORIES, id.as_str(), &memory)?;
        Ok(true)
    }

    fn delete_memory(&self, id: &MemoryId) -> Result<bool> {
        let _guard = self.lock();
        self.remove(MEMORIES, id.as_str())
    }
}

/// Total order for clamped importance scores. Scores are clamped to
/// `[0.0, 1.0]` at write time, so scaling to an integer is lossless enough
/// for ordering.
#[allow(clippy::cast_possible_truncation)]
fn ordered_importance(importance: f64) -> i64 {
    (importance * 1_000_000.0) as i64
}

impl UploadStore for DocumentBackend {
    fn create_upload(&self, new: NewUpload) -> Result<UploadedFile> {
        let upload = new.into_upload(Utc::now());
        self.write(UPLOADS, upload.id.as_str(), &upload)?;
        Ok(upload)
    }

    fn get_upload(&self, id: &FileId) -> Result<Option<UploadedFile>> {
        self.read(UPLOADS, id.as_str())
    }

    fn list_uploads_for_user(&self, user_id: &UserId, page: &Page) -> Result<Vec<UploadedFile>> {
        let uploads: Vec<UploadedFile> = self.scan(UPLOADS)?;
        let owned = uploads
            .into_iter()
            .filter(|u| u.user_id == *user_id)
            .collect();
        Ok(apply_page(owned, page, |u: &UploadedFile| u.created_at))
    }

    fn list_uploads_for_conversation(
        &self,
        conversation_id: &ConversationId,
        page: &Page,
    ) -> Result<Vec<UploadedFile>> {
        let uploads: Vec<UploadedFile> = self.scan(UPLOADS)?;
        let owned = uploads
            .into_iter()
            .filter(|u| u.conversation_id == *conversation_id)
            .collect();
        Ok(apply_page(owned, page, |u: &UploadedFile| u.created_at))
    }

    fn mark_processed(
        &self,
        id: &FileId,
        analysis: serde_json::Value,
    ) -> Result<Option<UploadedFile>> {
        let _guard = self.lock();
        let Some(mut upload) = self.read::<UploadedFile>(UPLOADS, id.as_str())? else {
            return Ok(None);
        };
        upload.is_processed = true;
        upload.analysis_result = Some(analysis);
        upload.updated_at = Utc::now();
        self.write(UPLOADS, id.as_str(), &upload)?;
        Ok(Some(upload))
    }

    fn delete_upload(&self, id: &FileId) -> Result<bool> {
        let _guard = self.lock();
        self.remove(UPLOADS, id.as_str())
    }
}

impl ApiKeyStore for DocumentBackend {
    fn create_api_key(&self, new: NewApiKey) -> Result<ApiKey> {
        let _guard = self.lock();
        let key = new.into_api_key(Utc::now());

        let existing: Vec<ApiKey> = self.scan(API_KEYS)?;
        if existing.iter().any(|k| k.key_hash == key.key_hash) {
            return Err(Error::Conflict {
                field: "key_hash".to_string(),
                value: key.prefix,
            });
        }

        self.write(API_KEYS, key.id.as_str(), &key)?;
        Ok(key)
    }

    fn get_api_key(&self, id: &ApiKeyId) -> Result<Option<ApiKey>> {
        self.read(API_KEYS, id.as_str())
    }

    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let keys: Vec<ApiKey> = self.scan(API_KEYS)?;
        Ok(keys.into_iter().find(|k| k.key_hash == key_hash))
    }

    fn list_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKey>> {
        let keys: Vec<ApiKey> = self.scan(API_KEYS)?;
        let mut owned: Vec<ApiKey> = keys.into_iter().filter(|k| k.user_id == *user_id).collect();
        owned.sort_by_key(|k| std::cmp::Reverse(k.created_at));
        Ok(owned)
    }

    fn touch_api_key(&self, id: &ApiKeyId) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut key) = self.read::<ApiKey>(API_KEYS, id.as_str())? else {
            return Ok(false);
        };
        key.last_used_at = Some(Utc::now());
        self.write(API_KEYS, id.as_str(), &key)?;
        Ok(true)
    }

    fn revoke_api_key(&self, id: &ApiKeyId) -> Result<bool> {
        let _guard = self.lock();
        let Some(mut key) = self.read::<ApiKey>(API_KEYS, id.as_str())? else {
            return Ok(false);
        };
        if key.revoked_at.is_some() {
            return Ok(false);
        }
        key.revoked_at = Some(Utc::now());
        self.write(API_KEYS, id.as_str(), &key)?;
        Ok(true)
    }
}

//! Cache-aside behavior tests.
//!
//! These exercise the service layer's caching policy end to end: population
//! on miss, service from cache on hit, invalidation after writes (including
//! dependent keys), and full graceful degradation when the cache is down.

#![allow(clippy::unwrap_used, clippy::panic)]

use convostore::cache::{CacheBackend, CacheError, CacheResult, InMemoryCache};
use convostore::models::{Page, Role, SortOrder};
use convostore::storage::SqliteBackend;
use convostore::{
    ApiKeyService, ConversationService, MessageService, MemoryService, Store, UserService,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Delegating cache that counts operations.
struct SpyCache {
    inner: InMemoryCache,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl SpyCache {
    fn new() -> Self {
        Self {
            inner: InMemoryCache::new(1024),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl CacheBackend for SpyCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete(key)
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete_prefix(prefix)
    }
}

/// Cache that fails every call, simulating a dead Redis.
struct DeadCache;

impl CacheBackend for DeadCache {
    fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable {
            operation: "get".to_string(),
            cause: "connection refused".to_string(),
        })
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable {
            operation: "set".to_string(),
            cause: "connection refused".to_string(),
        })
    }

    fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable {
            operation: "delete".to_string(),
            cause: "connection refused".to_string(),
        })
    }

    fn delete_prefix(&self, _prefix: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable {
            operation: "delete_prefix".to_string(),
            cause: "connection refused".to_string(),
        })
    }
}

fn ttl() -> Duration {
    Duration::from_secs(300)
}

fn services_with_cache(
    cache: Arc<dyn CacheBackend>,
) -> (
    UserService,
    ConversationService,
    MessageService,
    MemoryService,
    ApiKeyService,
) {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    (
        UserService::new(backend.clone(), cache.clone(), ttl()),
        ConversationService::new(backend.clone(), cache.clone(), ttl()),
        MessageService::new(backend.clone(), cache.clone(), ttl()),
        MemoryService::new(backend.clone(), cache, ttl()),
        ApiKeyService::new(backend),
    )
}

#[test]
fn test_reads_populate_and_hit_the_cache() {
    let spy = Arc::new(SpyCache::new());
    let (users, ..) = services_with_cache(spy.clone());

    let user = users.register("ada", None, None).unwrap();

    users.get(&user.id).unwrap().unwrap();
    let sets_after_first = spy.sets.load(Ordering::Relaxed);
    assert!(sets_after_first >= 1, "miss should populate the cache");

    users.get(&user.id).unwrap().unwrap();
    // The second read is a hit: no further population happened.
    assert_eq!(spy.sets.load(Ordering::Relaxed), sets_after_first);
}

#[test]
fn test_update_is_never_served_stale() {
    let spy = Arc::new(SpyCache::new());
    let (_, conversations, ..) = services_with_cache(spy.clone());

    let conversation = conversations
        .start(&"u1".into(), "Before rename", &[])
        .unwrap();
    // Warm the cache.
    conversations.get(&conversation.id).unwrap().unwrap();

    conversations
        .update(
            &conversation.id,
            convostore::models::ConversationPatch {
                title: Some("After rename".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert!(spy.deletes.load(Ordering::Relaxed) >= 1);

    let fetched = conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(fetched.title, "After rename");
}

#[test]
fn test_message_write_invalidates_parent_conversation() {
    // The dependent-key case: message_count lives on the conversation, so a
    // cached conversation must be dropped by a message append.
    let cache = Arc::new(InMemoryCache::new(1024));
    let (_, conversations, messages, ..) = services_with_cache(cache);

    let conversation = conversations.start(&"u1".into(), "Counted", &[]).unwrap();
    let cached = conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(cached.message_count, 0);

    messages
        .append(&conversation.id, Role::User, "Hi", None)
        .unwrap();

    let refreshed = conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(refreshed.message_count, 1);
}

#[test]
fn test_message_write_invalidates_history_lists() {
    let cache = Arc::new(InMemoryCache::new(1024));
    let (_, conversations, messages, ..) = services_with_cache(cache);

    let conversation = conversations.start(&"u1".into(), "History", &[]).unwrap();
    let page = Page::default().with_order(SortOrder::Asc);

    // Caches the empty history.
    assert!(messages.history(&conversation.id, &page).unwrap().is_empty());

    messages
        .append(&conversation.id, Role::User, "Hi", None)
        .unwrap();

    let history = messages.history(&conversation.id, &page).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Hi");
}

#[test]
fn test_everything_works_with_a_dead_cache() {
    let (users, conversations, messages, memories, _) =
        services_with_cache(Arc::new(DeadCache));

    let user = users.register("ada", None, None).unwrap();
    assert_eq!(users.get(&user.id).unwrap().unwrap().username, "ada");

    let conversation = conversations.start(&user.id, "Resilient", &[]).unwrap();
    messages
        .append(&conversation.id, Role::User, "still here", None)
        .unwrap();
    let page = Page::default().with_order(SortOrder::Asc);
    assert_eq!(messages.history(&conversation.id, &page).unwrap().len(), 1);

    let fact = memories
        .learn(&user.id, None, "q", "a", 0.7, &[])
        .unwrap();
    assert!(memories.get(&fact.id).unwrap().is_some());

    assert_eq!(
        conversations
            .get(&conversation.id)
            .unwrap()
            .unwrap()
            .message_count,
        1
    );
}

#[test]
fn test_api_key_generate_validate_revoke_cycle() {
    let (users, _, _, _, api_keys) = services_with_cache(Arc::new(InMemoryCache::new(64)));
    let user = users.register("ada", None, None).unwrap();

    let generated = api_keys.generate(&user.id, "ci token").unwrap();
    assert!(generated.plaintext.starts_with("ck_"));
    assert_eq!(generated.record.prefix, &generated.plaintext[..11]);

    let validated = api_keys.validate(&generated.plaintext).unwrap().unwrap();
    assert_eq!(validated.id, generated.record.id);

    // Validation stamped last_used_at.
    let record = api_keys.get(&generated.record.id).unwrap().unwrap();
    assert!(record.last_used_at.is_some());

    assert!(api_keys.revoke(&generated.record.id).unwrap());
    assert!(api_keys.validate(&generated.plaintext).unwrap().is_none());

    // Wrong plaintext never validates.
    assert!(api_keys.validate("ck_not_a_real_key").unwrap().is_none());
}

#[test]
fn test_store_wires_the_full_stack() {
    let store = Store::in_memory().unwrap();

    let user = store.users().register("ada", Some("ada@example.com"), None).unwrap();
    let conversation = store.conversations().start(&user.id, "Test", &[]).unwrap();

    let hi = store
        .messages()
        .append(&conversation.id, Role::User, "Hi", None)
        .unwrap();
    let hello = store
        .messages()
        .append(&conversation.id, Role::Assistant, "Hello", Some("gpt-4o"))
        .unwrap();
    assert_eq!(hi.sequence_number, 1);
    assert_eq!(hello.sequence_number, 2);

    assert_eq!(
        store
            .conversations()
            .get(&conversation.id)
            .unwrap()
            .unwrap()
            .message_count,
        2
    );

    store.messages().delete(&hi.id, true).unwrap();
    assert_eq!(
        store.conversations().recount(&conversation.id).unwrap(),
        Some(1)
    );

    store.close();
}

#[test]
fn test_validation_rejects_bad_input_before_storage() {
    let (users, conversations, messages, memories, api_keys) =
        services_with_cache(Arc::new(InMemoryCache::new(64)));

    assert!(users.register("", None, None).is_err());
    assert!(users.register("two words", None, None).is_err());
    assert!(users.register("ada", Some("not-an-email"), None).is_err());

    assert!(conversations.start(&"u1".into(), "   ", &[]).is_err());

    let conversation = conversations.start(&"u1".into(), "ok", &[]).unwrap();
    assert!(
        messages
            .append(&conversation.id, Role::User, "", None)
            .is_err()
    );

    assert!(memories.learn(&"u1".into(), None, "", "a", 0.5, &[]).is_err());
    assert!(memories.learn(&"u1".into(), None, "q", " ", 0.5, &[]).is_err());

    assert!(api_keys.generate(&"u1".into(), "  ").is_err());
}

//! Repository-contract integration tests.
//!
//! Every test runs against both adapters: the relational `SQLite` backend
//! and the JSON document backend. The contract is the same; only the storage
//! shape differs.

#![allow(clippy::unwrap_used, clippy::panic, clippy::too_many_lines)]

use convostore::models::{
    ConversationFilter, ConversationPatch, MemoryPatch, NewMessage, NewUpload, Page, Role,
    SortOrder, UserPatch,
};
use convostore::storage::{
    ApiKeyStore, ConversationStore, DocumentBackend, MemoryStore, MessageStore, SqliteBackend,
    StorageBackend, UploadStore, UserStore,
};
use convostore::{Conversation, Error, User};

fn with_backends(test: impl Fn(&dyn StorageBackend)) {
    let sqlite = SqliteBackend::in_memory().unwrap();
    test(&sqlite);

    let dir = tempfile::tempdir().unwrap();
    let document = DocumentBackend::open(dir.path()).unwrap();
    test(&document);
}

fn make_user(backend: &dyn StorageBackend, username: &str) -> User {
    backend
        .create_user(convostore::models::NewUser {
            username: username.to_string(),
            email: Some(format!("{username}@example.com")),
            full_name: None,
            is_admin: false,
        })
        .unwrap()
}

fn make_conversation(backend: &dyn StorageBackend, user: &User, title: &str) -> Conversation {
    backend
        .create_conversation(convostore::models::NewConversation {
            user_id: user.id.clone(),
            title: title.to_string(),
            tags: Vec::new(),
            metadata: None,
        })
        .unwrap()
}

fn append(backend: &dyn StorageBackend, conversation: &Conversation, role: Role, content: &str) -> convostore::Message {
    backend
        .append_message(NewMessage {
            conversation_id: conversation.id.clone(),
            role,
            content: content.to_string(),
            model: None,
            sequence_number: None,
        })
        .unwrap()
}

#[test]
fn test_created_user_reads_back_identically() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let fetched = backend.get_user(&user.id).unwrap().unwrap();

        assert_eq!(fetched.username, user.username);
        assert_eq!(fetched.email, user.email);
        assert_eq!(fetched.is_active, user.is_active);
        assert_eq!(fetched.is_admin, user.is_admin);
        assert_eq!(fetched.created_at, user.created_at);

        let by_name = backend.get_user_by_username("ada").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        assert!(backend.get_user(&"missing".into()).unwrap().is_none());
    });
}

#[test]
fn test_duplicate_username_and_email_conflict() {
    with_backends(|backend| {
        make_user(backend, "ada");

        let dup_name = backend.create_user(convostore::models::NewUser {
            username: "ada".to_string(),
            email: None,
            full_name: None,
            is_admin: false,
        });
        assert!(matches!(dup_name, Err(Error::Conflict { field, .. }) if field == "username"));

        let dup_email = backend.create_user(convostore::models::NewUser {
            username: "lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            full_name: None,
            is_admin: false,
        });
        assert!(matches!(dup_email, Err(Error::Conflict { field, .. }) if field == "email"));
    });
}

#[test]
fn test_user_update_merges_and_soft_delete_hides() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");

        let updated = backend
            .update_user(
                &user.id,
                UserPatch {
                    full_name: Some("Ada Lovelace".to_string()),
                    ..UserPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(updated.email, user.email);

        assert!(
            backend
                .update_user(&"missing".into(), UserPatch::default())
                .unwrap()
                .is_none()
        );

        assert!(backend.delete_user(&user.id, true).unwrap());
        // Soft delete: point lookup still works, listing hides the user.
        let hidden = backend.get_user(&user.id).unwrap().unwrap();
        assert!(hidden.deleted_at.is_some());
        assert!(!hidden.is_active);
        assert!(backend.list_users(&Page::default()).unwrap().is_empty());

        // Second soft delete affects nothing.
        assert!(!backend.delete_user(&user.id, true).unwrap());

        assert!(backend.delete_user(&user.id, false).unwrap());
        assert!(backend.get_user(&user.id).unwrap().is_none());
    });
}

#[test]
fn test_record_login_stamps_timestamp() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        assert!(user.last_login.is_none());

        assert!(backend.record_login(&user.id).unwrap());
        let fetched = backend.get_user(&user.id).unwrap().unwrap();
        assert!(fetched.last_login.is_some());

        assert!(!backend.record_login(&"missing".into()).unwrap());
    });
}

#[test]
fn test_conversation_scenario_sequence_and_recount() {
    // The canonical flow: create "Test", user "Hi" (seq 1), assistant
    // "Hello" (seq 2), count 2; delete "Hi", count 1.
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Test");
        assert_eq!(conversation.message_count, 0);

        let hi = append(backend, &conversation, Role::User, "Hi");
        assert_eq!(hi.sequence_number, 1);
        let hello = append(backend, &conversation, Role::Assistant, "Hello");
        assert_eq!(hello.sequence_number, 2);

        let counted = backend.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(counted.message_count, 2);

        assert!(backend.delete_message(&hi.id, true).unwrap());
        let recounted = backend.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(recounted.message_count, 1);

        // Recounting is idempotent.
        assert_eq!(backend.recount_messages(&conversation.id).unwrap(), Some(1));
        assert_eq!(backend.recount_messages(&conversation.id).unwrap(), Some(1));
        assert!(backend.recount_messages(&"missing".into()).unwrap().is_none());
    });
}

#[test]
fn test_sequence_numbers_skip_soft_deleted_slots() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Test");

        assert_eq!(backend.next_sequence_number(&conversation.id).unwrap(), 1);

        append(backend, &conversation, Role::User, "one");
        let second = append(backend, &conversation, Role::User, "two");
        backend.delete_message(&second.id, true).unwrap();

        // The soft-deleted row keeps its slot: max is still 2.
        assert_eq!(backend.next_sequence_number(&conversation.id).unwrap(), 3);

        let explicit_clash = backend.append_message(NewMessage {
            conversation_id: conversation.id.clone(),
            role: Role::User,
            content: "clash".to_string(),
            model: None,
            sequence_number: Some(1),
        });
        assert!(matches!(
            explicit_clash,
            Err(Error::Conflict { field, .. }) if field == "sequence_number"
        ));

        let appended = backend.append_message(NewMessage {
            conversation_id: "missing".into(),
            role: Role::User,
            content: "orphan".to_string(),
            model: None,
            sequence_number: None,
        });
        assert!(matches!(appended, Err(Error::InvalidInput(_))));
    });
}

#[test]
fn test_message_listing_hides_soft_deleted() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Test");

        let first = append(backend, &conversation, Role::User, "first");
        append(backend, &conversation, Role::Assistant, "second");
        backend.delete_message(&first.id, true).unwrap();

        let page = Page::default().with_order(SortOrder::Asc);
        let listed = backend.list_messages(&conversation.id, &page).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "second");

        // Point lookup still returns the soft-deleted row.
        let tombstoned = backend.get_message(&first.id).unwrap().unwrap();
        assert!(tombstoned.deleted_at.is_some());

        // Search skips it too.
        let hits = backend
            .search_messages(&conversation.id, "FIRST", &page)
            .unwrap();
        assert!(hits.is_empty());
        let hits = backend
            .search_messages(&conversation.id, "SEC", &page)
            .unwrap();
        assert_eq!(hits.len(), 1);
    });
}

#[test]
fn test_edit_history_is_append_only() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Test");
        let message = append(backend, &conversation, Role::User, "v1");

        backend.edit_message(&message.id, "v2").unwrap().unwrap();
        let edited = backend.edit_message(&message.id, "v3").unwrap().unwrap();

        assert!(edited.is_edited);
        assert_eq!(edited.content, "v3");
        let history: Vec<&str> = edited
            .edit_history
            .iter()
            .map(|r| r.content.as_str())
            .collect();
        assert_eq!(history, vec!["v1", "v2"]);

        // The stored row matches the returned one.
        let fetched = backend.get_message(&message.id).unwrap().unwrap();
        assert_eq!(fetched.edit_history.len(), 2);
        assert_eq!(fetched.edit_history[0].content, "v1");

        assert!(backend.edit_message(&"missing".into(), "x").unwrap().is_none());
    });
}

#[test]
fn test_conversation_delete_cascades_to_owned_entities() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Doomed");
        let other = make_conversation(backend, &user, "Safe");

        let message = append(backend, &conversation, Role::User, "going away");
        let bound_memory = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: Some(conversation.id.clone()),
                question: "q".to_string(),
                answer: "a".to_string(),
                importance: 0.5,
                tags: Vec::new(),
            })
            .unwrap();
        let free_memory = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "free".to_string(),
                answer: "standing".to_string(),
                importance: 0.5,
                tags: Vec::new(),
            })
            .unwrap();
        let upload = backend
            .create_upload(NewUpload {
                user_id: user.id.clone(),
                conversation_id: conversation.id.clone(),
                filename: "notes.pdf".to_string(),
                file_path: "/tmp/notes.pdf".to_string(),
                file_type: "application/pdf".to_string(),
                file_size: 1024,
            })
            .unwrap();

        assert!(backend.delete_conversation(&conversation.id).unwrap());
        assert!(!backend.delete_conversation(&conversation.id).unwrap());

        assert!(backend.get_conversation(&conversation.id).unwrap().is_none());
        assert!(backend.get_message(&message.id).unwrap().is_none());
        assert!(backend.get_memory(&bound_memory.id).unwrap().is_none());
        assert!(backend.get_upload(&upload.id).unwrap().is_none());

        // Unbound entities survive.
        assert!(backend.get_memory(&free_memory.id).unwrap().is_some());
        assert!(backend.get_conversation(&other.id).unwrap().is_some());
    });
}

#[test]
fn test_conversation_filters_and_pagination() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let outsider = make_user(backend, "bob");

        let tagged = backend
            .create_conversation(convostore::models::NewConversation {
                user_id: user.id.clone(),
                title: "Rust questions".to_string(),
                tags: vec!["Rust".to_string()],
                metadata: None,
            })
            .unwrap();
        make_conversation(backend, &user, "Python notes");
        make_conversation(backend, &outsider, "Other user's chat");

        backend
            .update_conversation(
                &tagged.id,
                ConversationPatch {
                    is_pinned: Some(true),
                    ..ConversationPatch::default()
                },
            )
            .unwrap();

        let mine = backend
            .list_conversations(&ConversationFilter::for_user(&user.id), &Page::default())
            .unwrap();
        assert_eq!(mine.len(), 2);

        let pinned = backend
            .list_conversations(
                &ConversationFilter {
                    user_id: Some(user.id.clone()),
                    is_pinned: Some(true),
                    ..ConversationFilter::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].id, tagged.id);

        // Tag filter matches lowercased storage regardless of query case.
        let by_tag = backend
            .list_conversations(
                &ConversationFilter {
                    user_id: Some(user.id.clone()),
                    tag: Some("RUST".to_string()),
                    ..ConversationFilter::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_tag.len(), 1);

        let by_title = backend
            .list_conversations(
                &ConversationFilter {
                    user_id: Some(user.id.clone()),
                    title_contains: Some("python".to_string()),
                    ..ConversationFilter::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_title.len(), 1);

        let paged = backend
            .list_conversations(
                &ConversationFilter::for_user(&user.id),
                &Page::new(1, 1),
            )
            .unwrap();
        assert_eq!(paged.len(), 1);
    });
}

#[test]
fn test_stored_tags_are_lowercased_in_order() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = backend
            .create_conversation(convostore::models::NewConversation {
                user_id: user.id.clone(),
                title: "t".to_string(),
                tags: vec!["Python".to_string(), "CODING".to_string()],
                metadata: None,
            })
            .unwrap();
        let fetched = backend.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["python", "coding"]);

        let memory = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "q".to_string(),
                answer: "a".to_string(),
                importance: 0.5,
                tags: vec!["Python".to_string(), "CODING".to_string()],
            })
            .unwrap();
        let fetched = backend.get_memory(&memory.id).unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["python", "coding"]);
    });
}

#[test]
fn test_importance_is_clamped_not_rejected() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");

        let high = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "q1".to_string(),
                answer: "a".to_string(),
                importance: 1.5,
                tags: Vec::new(),
            })
            .unwrap();
        assert!((high.importance - 1.0).abs() < f64::EPSILON);

        let low = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "q2".to_string(),
                answer: "a".to_string(),
                importance: -0.5,
                tags: Vec::new(),
            })
            .unwrap();
        assert!(low.importance.abs() < f64::EPSILON);

        // Updates clamp the same way.
        let updated = backend
            .update_memory(
                &low.id,
                MemoryPatch {
                    importance: Some(42.0),
                    ..MemoryPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!((updated.importance - 1.0).abs() < f64::EPSILON);
        let stored = backend.get_memory(&low.id).unwrap().unwrap();
        assert!((stored.importance - 1.0).abs() < f64::EPSILON);
    });
}

#[test]
fn test_memory_queries() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let page = Page::default();

        backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "favorite language?".to_string(),
                answer: "Rust, obviously".to_string(),
                importance: 0.9,
                tags: vec!["preference".to_string()],
            })
            .unwrap();
        let minor = backend
            .create_memory(convostore::models::NewMemory {
                user_id: user.id.clone(),
                conversation_id: None,
                question: "coffee order".to_string(),
                answer: "espresso".to_string(),
                importance: 0.2,
                tags: vec!["habit".to_string()],
            })
            .unwrap();

        let listed = backend.list_memories(&user.id, &page).unwrap();
        assert_eq!(listed.len(), 2);
        // Most important first under the default descending order.
        assert!((listed[0].importance - 0.9).abs() < f64::EPSILON);

        let hits = backend.search_memories(&user.id, "RUST", &page).unwrap();
        assert_eq!(hits.len(), 1);

        let by_tag = backend
            .memories_with_tags(&user.id, &["habit".to_string(), "unknown".to_string()], &page)
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, minor.id);
        assert!(
            backend
                .memories_with_tags(&user.id, &[], &page)
                .unwrap()
                .is_empty()
        );

        assert!(backend.touch_memory(&minor.id).unwrap());
        let touched = backend.get_memory(&minor.id).unwrap().unwrap();
        assert_eq!(touched.access_count, 1);
        assert!(touched.last_accessed.is_some());

        assert!(backend.delete_memory(&minor.id).unwrap());
        assert!(!backend.delete_memory(&minor.id).unwrap());
    });
}

#[test]
fn test_upload_lifecycle() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Files");

        let upload = backend
            .create_upload(NewUpload {
                user_id: user.id.clone(),
                conversation_id: conversation.id.clone(),
                filename: "scan.png".to_string(),
                file_path: "/uploads/scan.png".to_string(),
                file_type: "image/png".to_string(),
                file_size: 2048,
            })
            .unwrap();
        assert!(!upload.is_processed);
        assert!(upload.analysis_result.is_none());

        let processed = backend
            .mark_processed(&upload.id, serde_json::json!({"text": "INVOICE"}))
            .unwrap()
            .unwrap();
        assert!(processed.is_processed);
        assert_eq!(
            processed.analysis_result.unwrap()["text"],
            serde_json::json!("INVOICE")
        );

        assert_eq!(
            backend
                .list_uploads_for_user(&user.id, &Page::default())
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            backend
                .list_uploads_for_conversation(&conversation.id, &Page::default())
                .unwrap()
                .len(),
            1
        );

        assert!(
            backend
                .mark_processed(&"missing".into(), serde_json::json!({}))
                .unwrap()
                .is_none()
        );
    });
}

#[test]
fn test_api_key_records() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let key = backend
            .create_api_key(convostore::models::NewApiKey {
                user_id: user.id.clone(),
                label: "ci".to_string(),
                prefix: "ck_12345678".to_string(),
                key_hash: "deadbeef".repeat(8),
            })
            .unwrap();

        let found = backend
            .find_api_key_by_hash(&"deadbeef".repeat(8))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, key.id);
        assert!(found.is_active());

        // Same digest again is a conflict.
        let dup = backend.create_api_key(convostore::models::NewApiKey {
            user_id: user.id.clone(),
            label: "ci-2".to_string(),
            prefix: "ck_12345678".to_string(),
            key_hash: "deadbeef".repeat(8),
        });
        assert!(matches!(dup, Err(Error::Conflict { field, .. }) if field == "key_hash"));

        assert!(backend.revoke_api_key(&key.id).unwrap());
        assert!(!backend.revoke_api_key(&key.id).unwrap());
        let revoked = backend.get_api_key(&key.id).unwrap().unwrap();
        assert!(!revoked.is_active());

        assert_eq!(backend.list_api_keys(&user.id).unwrap().len(), 1);
    });
}

#[test]
fn test_bulk_append_small_batch_both_backends() {
    with_backends(|backend| {
        let user = make_user(backend, "ada");
        let conversation = make_conversation(backend, &user, "Bulk");

        let batch: Vec<NewMessage> = (0..5)
            .map(|i| NewMessage {
                conversation_id: conversation.id.clone(),
                role: Role::User,
                content: format!("message {i}"),
                model: None,
                sequence_number: None,
            })
            .collect();

        let inserted = backend.append_messages(batch).unwrap();
        let sequences: Vec<i64> = inserted.iter().map(|m| m.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

        let refreshed = backend.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(refreshed.message_count, 5);
    });
}

#[test]
fn test_bulk_append_crosses_chunk_boundary() {
    // 1001 rows spans two chunks in the relational adapter (chunk size 1000).
    let backend = SqliteBackend::in_memory().unwrap();
    let user = make_user(&backend, "ada");
    let conversation = make_conversation(&backend, &user, "Big import");

    let batch: Vec<NewMessage> = (0..1001)
        .map(|i| NewMessage {
            conversation_id: conversation.id.clone(),
            role: Role::User,
            content: format!("m{i}"),
            model: None,
            sequence_number: None,
        })
        .collect();

    let inserted = backend.append_messages(batch).unwrap();
    assert_eq!(inserted.len(), 1001);
    assert_eq!(inserted.last().unwrap().sequence_number, 1001);

    let refreshed = backend.get_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(refreshed.message_count, 1001);
}

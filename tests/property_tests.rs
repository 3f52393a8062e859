//! Property-based tests for the write-time normalization rules and the
//! sequence-number invariant.

#![allow(clippy::unwrap_used, clippy::panic)]

use convostore::models::{
    IMPORTANCE_MAX, IMPORTANCE_MIN, MAX_PAGE_LIMIT, NewMessage, Page, Role, clamp_importance,
    normalize_tags,
};
use convostore::storage::{ConversationStore, MessageStore, SqliteBackend, UserStore};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_clamped_importance_stays_in_bounds(value in proptest::num::f64::ANY) {
        let clamped = clamp_importance(value);
        prop_assert!(clamped >= IMPORTANCE_MIN);
        prop_assert!(clamped <= IMPORTANCE_MAX);
    }

    #[test]
    fn prop_in_range_importance_is_unchanged(value in IMPORTANCE_MIN..=IMPORTANCE_MAX) {
        prop_assert!((clamp_importance(value) - value).abs() < f64::EPSILON);
    }

    #[test]
    fn prop_normalized_tags_are_lowercase_in_order(
        tags in proptest::collection::vec("[A-Za-z][A-Za-z0-9_-]{0,12}", 0..8)
    ) {
        let normalized = normalize_tags(&tags);
        let expected: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        prop_assert_eq!(normalized, expected);
    }

    #[test]
    fn prop_effective_limit_is_always_bounded(offset in 0u64..10_000, limit in 0u32..100_000) {
        let page = Page::new(offset, limit);
        let effective = page.effective_limit();
        prop_assert!(effective >= 1);
        prop_assert!(effective <= MAX_PAGE_LIMIT);
    }

    #[test]
    fn prop_sequence_numbers_count_up_from_one(n in 1usize..20) {
        let backend = SqliteBackend::in_memory().unwrap();
        let user = backend
            .create_user(convostore::models::NewUser {
                username: "u".to_string(),
                email: None,
                full_name: None,
                is_admin: false,
            })
            .unwrap();
        let conversation = backend
            .create_conversation(convostore::models::NewConversation {
                user_id: user.id,
                title: "seq".to_string(),
                tags: Vec::new(),
                metadata: None,
            })
            .unwrap();

        let mut sequences = Vec::with_capacity(n);
        for i in 0..n {
            let message = backend
                .append_message(NewMessage {
                    conversation_id: conversation.id.clone(),
                    role: Role::User,
                    content: format!("m{i}"),
                    model: None,
                    sequence_number: None,
                })
                .unwrap();
            sequences.push(message.sequence_number);
        }

        let expected: Vec<i64> = (1..=n as i64).collect();
        prop_assert_eq!(sequences, expected);

        let refreshed = backend.get_conversation(&conversation.id).unwrap().unwrap();
        prop_assert_eq!(refreshed.message_count, n as i64);
    }
}

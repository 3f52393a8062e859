//! Read-path benchmark: cache hit vs storage round trip.

#![allow(clippy::unwrap_used, missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use convostore::cache::{InMemoryCache, NullCache};
use convostore::models::Role;
use convostore::storage::SqliteBackend;
use convostore::{ConversationId, ConversationService, MessageService};
use std::sync::Arc;
use std::time::Duration;

fn seeded_conversation(
    cache: Arc<dyn convostore::cache::CacheBackend>,
) -> (ConversationService, ConversationId) {
    let backend = Arc::new(SqliteBackend::in_memory().unwrap());
    let conversations =
        ConversationService::new(backend.clone(), cache.clone(), Duration::from_secs(300));
    let messages = MessageService::new(backend, cache, Duration::from_secs(300));

    let conversation = conversations.start(&"bench-user".into(), "Benchmark", &[]).unwrap();
    for i in 0..50 {
        messages
            .append(&conversation.id, Role::User, &format!("message {i}"), None)
            .unwrap();
    }
    (conversations, conversation.id)
}

fn bench_get_conversation(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_conversation");

    let (cached_service, cached_id) = seeded_conversation(Arc::new(InMemoryCache::new(1024)));
    // Warm the cache so the measured loop is all hits.
    cached_service.get(&cached_id).unwrap();
    group.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cached_service.get(black_box(&cached_id)).unwrap()));
    });

    let (uncached_service, uncached_id) = seeded_conversation(Arc::new(NullCache));
    group.bench_function("storage_round_trip", |b| {
        b.iter(|| black_box(uncached_service.get(black_box(&uncached_id)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_get_conversation);
criterion_main!(benches);

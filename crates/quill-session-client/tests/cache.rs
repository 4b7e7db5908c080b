// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use quill_dry_tests::{AppHarness, CountingTransport, ScriptedTransport};
use quill_registry_api::{CallError, ErrorKind};
use quill_session_client::{total_revenue, QueryCache};
use serde_json::{json, Value};

// Answers `billings.getTotalSales` with a counter so every fetch is distinguishable.
fn numbered() -> ScriptedTransport {
    let transport = ScriptedTransport::new();
    let n = Arc::new(AtomicU64::new(0));
    transport.respond_with("billings", "getTotalSales", move |_| {
        Ok(json!({ "n": n.fetch_add(1, Ordering::SeqCst) + 1 }))
    });
    transport
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_identical_queries_share_one_call() {
    let transport = numbered();
    transport.hold();
    let cache = QueryCache::new(transport.clone());
    let queries = (0..8).map(|_| cache.query("billings", "getTotalSales", Value::Null));
    let release = async {
        settle().await;
        transport.open();
    };
    let (results, ()) = tokio::join!(join_all(queries), release);
    assert_eq!(transport.call_count("billings", "getTotalSales"), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!({ "n": 1 }));
    }
}

#[tokio::test]
async fn fresh_value_is_served_without_a_call() {
    let transport = numbered();
    let cache = QueryCache::new(transport.clone());
    let first = cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    let second = cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.total_calls(), 1);
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert!(state.fresh);
    assert!(!state.in_flight);
}

#[tokio::test]
async fn inputs_with_reordered_keys_share_an_entry() {
    let transport = ScriptedTransport::new();
    transport.respond("products", "byId", json!({ "id": "p-1", "name": "Pen" }));
    let cache = QueryCache::new(transport.clone());
    cache
        .query("products", "byId", json!({ "id": "p-1", "x": { "b": 1, "a": 2 } }))
        .await
        .unwrap();
    cache
        .query("products", "byId", json!({ "x": { "a": 2, "b": 1 }, "id": "p-1" }))
        .await
        .unwrap();
    assert_eq!(transport.total_calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn invalidation_refetches_once_for_all_observers() {
    let transport = numbered();
    let cache = QueryCache::new(transport.clone());
    cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    let mut a = cache.observe("billings", "getTotalSales", Value::Null);
    let mut b = cache.observe("billings", "getTotalSales", Value::Null);

    assert_eq!(cache.invalidate("billings", None), 1);
    assert_eq!(a.changed().await, Some(json!({ "n": 2 })));
    assert_eq!(b.changed().await, Some(json!({ "n": 2 })));
    settle().await;
    assert_eq!(transport.call_count("billings", "getTotalSales"), 2);
    assert_eq!(
        cache.query("billings", "getTotalSales", Value::Null).await.unwrap(),
        json!({ "n": 2 })
    );
    assert_eq!(transport.call_count("billings", "getTotalSales"), 2);
}

#[tokio::test]
async fn unobserved_entries_refetch_lazily() {
    let transport = numbered();
    let cache = QueryCache::new(transport.clone());
    cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    assert_eq!(cache.invalidate("billings", Some("getTotalSales")), 1);
    settle().await;
    assert_eq!(transport.total_calls(), 1);
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert!(!state.fresh);
    assert_eq!(state.value, Some(json!({ "n": 1 })));
    assert_eq!(
        cache.query("billings", "getTotalSales", Value::Null).await.unwrap(),
        json!({ "n": 2 })
    );
}

#[tokio::test]
async fn invalidation_only_touches_matching_entries() {
    let transport = numbered();
    transport.respond("billings", "getMonthlySales", json!([]));
    transport.respond("settings", "socialAuth", json!({}));
    let cache = QueryCache::new(transport.clone());
    for (group, op) in [
        ("billings", "getTotalSales"),
        ("billings", "getMonthlySales"),
        ("settings", "socialAuth"),
    ] {
        cache.query(group, op, Value::Null).await.unwrap();
    }
    assert_eq!(cache.invalidate("billings", Some("getMonthlySales")), 1);
    assert_eq!(cache.invalidate("billings", None), 2);
    assert_eq!(cache.invalidate("usage", None), 0);
    assert!(cache.entry_state("settings", "socialAuth", &Value::Null).unwrap().fresh);
}

#[tokio::test]
async fn query_after_invalidation_never_sees_the_earlier_fetch() {
    let transport = numbered();
    transport.hold();
    let cache = QueryCache::new(transport.clone());

    let before = tokio::spawn({
        let cache = cache.clone();
        async move { cache.query("billings", "getTotalSales", Value::Null).await }
    });
    settle().await;
    assert_eq!(transport.total_calls(), 1);

    cache.invalidate("billings", None);
    let after = tokio::spawn({
        let cache = cache.clone();
        async move { cache.query("billings", "getTotalSales", Value::Null).await }
    });
    settle().await;
    // The second caller is waiting out the first fetch, not sharing it.
    assert_eq!(transport.total_calls(), 1);

    transport.release(2);
    assert_eq!(before.await.unwrap().unwrap(), json!({ "n": 1 }));
    assert_eq!(after.await.unwrap().unwrap(), json!({ "n": 2 }));
    assert_eq!(transport.total_calls(), 2);
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert_eq!(state.value, Some(json!({ "n": 2 })));
}

#[tokio::test]
async fn failed_fetches_are_not_cached() {
    let transport = numbered();
    transport.respond_once(
        "billings",
        "getTotalSales",
        Err(CallError::transport("connection reset")),
    );
    let cache = QueryCache::new(transport.clone());
    let err = cache
        .query("billings", "getTotalSales", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert!(!state.fresh);
    assert_eq!(state.value, None);
    assert_eq!(state.last_error.as_ref().map(CallError::kind), Some(ErrorKind::Transport));

    let value = cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    assert_eq!(value, json!({ "n": 1 }));
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert!(state.last_error.is_none());
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn unknown_procedures_fail_fast_every_time() {
    let transport = ScriptedTransport::new();
    let cache = QueryCache::new(transport.clone());
    for _ in 0..2 {
        let err = cache.query("billings", "nope", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn dropped_suspend_still_caches_its_result() {
    let transport = numbered();
    transport.hold();
    let cache = QueryCache::new(transport.clone());

    let unmounted = tokio::time::timeout(
        Duration::from_millis(20),
        cache.suspend("billings", "getTotalSales", Value::Null),
    )
    .await;
    assert!(unmounted.is_err());

    transport.open();
    eventually(|| {
        cache
            .entry_state("billings", "getTotalSales", &Value::Null)
            .is_some_and(|s| s.fresh)
    })
    .await;
    let state = cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap();
    assert_eq!(state.observers, 0);
    assert_eq!(
        cache.query("billings", "getTotalSales", Value::Null).await.unwrap(),
        json!({ "n": 1 })
    );
    assert_eq!(transport.total_calls(), 1);
}

#[tokio::test]
async fn last_observer_detaching_removes_the_entry() {
    let transport = numbered();
    let cache = QueryCache::new(transport.clone());
    let (value, observer) = cache
        .suspend("billings", "getTotalSales", Value::Null)
        .await
        .unwrap();
    assert_eq!(value, json!({ "n": 1 }));
    assert_eq!(observer.current(), Some(json!({ "n": 1 })));
    let second = cache.observe("billings", "getTotalSales", Value::Null);
    assert_eq!(
        cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap().observers,
        2
    );
    drop(observer);
    assert_eq!(cache.len(), 1);
    drop(second);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn observers_of_a_cleared_cache_see_the_end() {
    let transport = numbered();
    let cache = QueryCache::new(transport.clone());
    let (_, mut observer) = cache
        .suspend("billings", "getTotalSales", Value::Null)
        .await
        .unwrap();
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(observer.changed().await, None);
    drop(observer);
    assert!(cache.is_empty());
}

fn page(n: u64) -> Value {
    json!({ "page": n })
}

#[tokio::test]
async fn idle_limit_evicts_least_recently_used_entries() {
    let transport = numbered();
    let cache = QueryCache::with_idle_limit(transport.clone(), 2);
    let (_, _observer) = cache
        .suspend("billings", "getTotalSales", page(0))
        .await
        .unwrap();
    for n in 1..=3 {
        cache.query("billings", "getTotalSales", page(n)).await.unwrap();
    }
    assert!(cache.entry_state("billings", "getTotalSales", &page(1)).is_none());
    assert_eq!(cache.len(), 3);

    // Reading page 2 again makes page 3 the oldest idle entry.
    cache.query("billings", "getTotalSales", page(2)).await.unwrap();
    cache.query("billings", "getTotalSales", page(4)).await.unwrap();
    assert!(cache.entry_state("billings", "getTotalSales", &page(3)).is_none());
    assert!(cache.entry_state("billings", "getTotalSales", &page(2)).is_some());
    assert!(cache.entry_state("billings", "getTotalSales", &page(0)).is_some());
    assert_eq!(transport.call_count("billings", "getTotalSales"), 5);
}

#[tokio::test]
async fn evict_idle_spares_observed_entries() {
    let cache = QueryCache::new(numbered());
    let (_, _observer) = cache
        .suspend("billings", "getTotalSales", page(0))
        .await
        .unwrap();
    cache.query("billings", "getTotalSales", page(1)).await.unwrap();
    assert_eq!(cache.evict_idle(), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.entry_state("billings", "getTotalSales", &page(0)).is_some());
}

#[tokio::test]
async fn mutations_bypass_the_cache() {
    let transport = numbered();
    transport.respond_with("products", "create", |req| Ok(req.input.clone()));
    let cache = QueryCache::new(transport.clone());
    cache.query("billings", "getTotalSales", Value::Null).await.unwrap();
    let input = json!({ "name": "Pen", "price": 2.5 });
    for _ in 0..2 {
        assert_eq!(cache.mutate("products", "create", input.clone()).await.unwrap(), input);
    }
    assert_eq!(transport.call_count("products", "create"), 2);
    assert_eq!(cache.len(), 1);
    assert!(cache.entry_state("billings", "getTotalSales", &Value::Null).unwrap().fresh);
}

#[tokio::test]
async fn revenue_card_renders_seeded_totals() {
    let harness = AppHarness::seeded();
    let transport = CountingTransport::new(harness.transport());
    let cache = QueryCache::new(transport.clone());
    let card = total_revenue(&cache).await.unwrap();
    assert_eq!(card.title, "Total Revenue");
    assert_eq!(card.amount, "$3,896.00");
    assert_eq!(card.change, "-5.2% from last month");
    total_revenue(&cache).await.unwrap();
    assert_eq!(transport.count("billings", "getTotalSales"), 1);
}

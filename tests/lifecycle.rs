//! Live Query Lifecycle Tests
//!
//! Setup errors, completion reasons, exactly-once cleanup, engine shutdown,
//! the reconciliation sweep and single-document observation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aerodb_live::live::{
    CompletionReason, DocumentId, Filter, LiveError, LiveQueryConfig, LiveQueryEngine, MemoryStore,
    MemoryStoreConfig, Sorting,
};
use aerodb_live::observability::LiveMetrics;
use common::*;
use serde_json::{json, Value};
use tokio::time::timeout;

// =============================================================================
// Setup
// =============================================================================

#[tokio::test]
async fn test_store_failure_is_setup_error() {
    let store = seeded(vec![task("a", 1, "open")]);
    let engine = engine(&store);
    store.set_unavailable(true);

    let err = engine.observe::<Value>(&Filter::All, None, None).await.err().unwrap();
    assert!(matches!(err, LiveError::Store(_)));
    assert_eq!(store.open_feeds(), 0);
    assert_eq!(engine.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_invalid_filter_opens_nothing() {
    let store = seeded(vec![]);
    let engine = engine(&store);

    let err = engine
        .observe::<Value>(&Filter::and(vec![]), None, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LiveError::InvalidFilter(_)));
    assert_eq!(store.stats().feeds_opened, 0);
    assert_eq!(engine.metrics().snapshot().setup_failures, 1);
}

#[tokio::test]
async fn test_identity_mapping_failure_releases_feed() {
    // priority is not a number, so the typed snapshot cannot map it
    let store = seeded(vec![json!({"_id": "a", "title": "t", "priority": "high", "status": "open"})]);
    let err = engine(&store)
        .observe::<Task>(&Filter::All, None, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LiveError::IdentityMapping(_)));
    assert_eq!(store.stats().feeds_opened, 1);
    assert_eq!(store.open_feeds(), 0);
}

#[tokio::test]
async fn test_missing_identity_field_is_setup_error() {
    let store = seeded(vec![task("a", 1, "open")]);
    let config = LiveQueryConfig {
        id_field: "key".to_string(),
        ..LiveQueryConfig::for_collection("tasks")
    };
    let err = engine_with(&store, config)
        .observe::<Value>(&Filter::All, None, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LiveError::IdentityMapping(_)));
    assert_eq!(store.open_feeds(), 0);
}

// =============================================================================
// Identity field
// =============================================================================

fn keyed_store() -> MemoryStore {
    let store = MemoryStore::new(MemoryStoreConfig {
        id_field: "key".to_string(),
        collection: "tasks".to_string(),
    });
    for (key, n) in [("a", 1), ("b", 2), ("c", 3)] {
        store.insert(json!({"key": key, "n": n})).unwrap();
    }
    store
}

fn keyed_config() -> LiveQueryConfig {
    LiveQueryConfig {
        id_field: "key".to_string(),
        ..LiveQueryConfig::for_collection("tasks")
    }
}

/// Documents keyed by a configured field stay distinct.
#[tokio::test]
async fn test_custom_id_field() {
    let store = keyed_store();
    let live = engine_with(&store, keyed_config())
        .observe::<Value>(&Filter::All, Some(Sorting::asc("n")), None)
        .await
        .unwrap();
    let mut snapshots = live.subscribe();
    let first = next(&mut snapshots).await;
    let keys: Vec<_> = first.items.iter().map(|d| d["key"].clone()).collect();
    assert_eq!(keys, vec![json!("a"), json!("b"), json!("c")]);
    assert_eq!(first.total_items, 3);

    store.update(json!({"key": "b", "n": 2, "edited": true})).unwrap();
    let after = next(&mut snapshots).await;
    assert_eq!(after.items.len(), 3);
    assert_eq!(after.items[1]["edited"], true);

    store.delete(&DocumentId::from("a"));
    let after = next(&mut snapshots).await;
    assert_eq!(after.items.len(), 2);
    assert_eq!(after.total_items, 2);
}

#[tokio::test]
async fn test_observe_by_id_on_custom_id_field() {
    let store = keyed_store();
    let live = engine_with(&store, keyed_config())
        .observe_by_id::<Value, _>("c")
        .await
        .unwrap();
    let mut snapshots = live.subscribe();
    assert_eq!(next(&mut snapshots).await.unwrap()["n"], 3);

    store.delete(&DocumentId::from("c"));
    assert_eq!(next(&mut snapshots).await, None);
}

// =============================================================================
// Completion
// =============================================================================

/// Unsubscribing twice completes once and releases the feed once.
#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let store = seeded(vec![task("a", 1, "open")]);
    let engine = engine(&store);
    let live = engine.observe::<Value>(&Filter::All, None, None).await.unwrap();
    let mut snapshots = live.subscribe();
    next(&mut snapshots).await;

    assert!(live.unsubscribe());
    assert!(!live.unsubscribe());
    assert!(timeout(WAIT, snapshots.recv()).await.unwrap().is_none());
    assert_eq!(live.completion(), Some(CompletionReason::Unsubscribed));

    wait_until(|| store.open_feeds() == 0).await;
    wait_until(|| engine.active_subscriptions() == 0).await;
    assert_eq!(store.stats().feeds_closed, 1);
    assert_eq!(engine.metrics().snapshot().subscriptions_closed, 1);
}

#[tokio::test]
async fn test_dropping_handle_releases_feed() {
    let store = seeded(vec![]);
    let engine = engine(&store);
    let live = engine.observe::<Value>(&Filter::All, None, None).await.unwrap();
    assert_eq!(store.open_feeds(), 1);

    drop(live);
    wait_until(|| store.open_feeds() == 0).await;
    wait_until(|| engine.active_subscriptions() == 0).await;
}

#[tokio::test]
async fn test_feed_end_completes() {
    let store = seeded(vec![]);
    let live = engine(&store).observe::<Value>(&Filter::All, None, None).await.unwrap();

    store.end_feeds();
    let reason = timeout(WAIT, live.completed()).await.unwrap();
    assert_eq!(reason, CompletionReason::FeedEnded);
}

#[tokio::test]
async fn test_feed_failure_completes_with_reason() {
    let store = seeded(vec![]);
    let engine = engine(&store);
    let live = engine.observe::<Value>(&Filter::All, None, None).await.unwrap();
    let mut snapshots = live.subscribe();
    next(&mut snapshots).await;

    store.fail_feeds(LiveError::store("connection reset"));

    // the stream just ends; the reason is only on the handle
    assert!(timeout(WAIT, snapshots.recv()).await.unwrap().is_none());
    match live.completion() {
        Some(CompletionReason::Failed(message)) => assert!(message.contains("connection reset")),
        other => panic!("unexpected completion: {:?}", other),
    }
    assert_eq!(engine.metrics().snapshot().feed_failures, 1);
    wait_until(|| store.open_feeds() == 0).await;
}

#[tokio::test]
async fn test_closed_feed_is_expected_shutdown() {
    let store = seeded(vec![]);
    let engine = engine(&store);
    let live = engine.observe::<Value>(&Filter::All, None, None).await.unwrap();

    store.fail_feeds(LiveError::FeedClosed);
    let reason = timeout(WAIT, live.completed()).await.unwrap();
    assert_eq!(reason, CompletionReason::Cancelled);
    assert_eq!(engine.metrics().snapshot().feed_failures, 0);
}

#[tokio::test]
async fn test_shutdown_cancels_all() {
    let store = seeded(vec![task("a", 1, "open")]);
    let engine = engine(&store);
    let first = engine.observe::<Value>(&Filter::All, None, None).await.unwrap();
    let second = engine.observe_by_id::<Task, _>("a").await.unwrap();
    assert_eq!(engine.active_subscriptions(), 2);

    engine.shutdown();
    assert_eq!(timeout(WAIT, first.completed()).await.unwrap(), CompletionReason::Cancelled);
    assert_eq!(timeout(WAIT, second.completed()).await.unwrap(), CompletionReason::Cancelled);
    wait_until(|| store.open_feeds() == 0).await;
    wait_until(|| engine.active_subscriptions() == 0).await;
}

#[tokio::test]
async fn test_engines_share_metrics() {
    let store = seeded(vec![]);
    let metrics = Arc::new(LiveMetrics::new());
    let config = LiveQueryConfig::for_collection("tasks");
    let a = LiveQueryEngine::with_metrics(Arc::new(store.clone()), config.clone(), Arc::clone(&metrics));
    let b = LiveQueryEngine::with_metrics(Arc::new(store.clone()), config, Arc::clone(&metrics));

    let _x = a.observe::<Value>(&Filter::All, None, None).await.unwrap();
    let _y = b.observe::<Value>(&Filter::All, None, None).await.unwrap();
    assert_eq!(metrics.active_subscriptions(), 2);
    assert_eq!(metrics.snapshot().snapshots_emitted, 2);
}

// =============================================================================
// Reconciliation
// =============================================================================

/// A document updated out of the filter is only dropped by the sweep.
#[tokio::test]
async fn test_reconcile_drops_stale_document() {
    let store = seeded(vec![task("a", 1, "open"), task("b", 2, "open")]);
    let config = LiveQueryConfig::for_collection("tasks").with_reconcile_interval(Duration::from_millis(20));
    let engine = engine_with(&store, config);
    let live = engine
        .observe::<Value>(&Filter::eq("status", "open"), Some(Sorting::asc("priority")), None)
        .await
        .unwrap();
    let mut snapshots = live.subscribe();
    assert_eq!(ids(&next(&mut snapshots).await), vec!["a", "b"]);

    store.update(task("a", 1, "done")).unwrap();
    let after = next(&mut snapshots).await;
    assert_eq!(ids(&after), vec!["b"]);
    assert_eq!(after.total_items, 1);
    assert!(engine.metrics().snapshot().reconciliations >= 1);
}

#[tokio::test]
async fn test_no_sweep_by_default() {
    let store = seeded(vec![task("a", 1, "open")]);
    let live = engine(&store)
        .observe::<Value>(&Filter::eq("status", "open"), None, None)
        .await
        .unwrap();
    let mut snapshots = live.subscribe();
    next(&mut snapshots).await;

    store.update(task("a", 1, "done")).unwrap();
    assert_quiet(&mut snapshots).await;
    assert_eq!(ids(&live.latest().unwrap()), vec!["a"]);
}

// =============================================================================
// Single document
// =============================================================================

#[tokio::test]
async fn test_observe_single_tracks_presence() {
    let store = seeded(vec![task("a", 1, "done")]);
    let live = engine(&store)
        .observe_single::<Task>(&Filter::eq("status", "open"))
        .await
        .unwrap();
    let mut snapshots = live.subscribe();
    assert_eq!(next(&mut snapshots).await, None);

    store.insert(task("b", 2, "open")).unwrap();
    let present = next(&mut snapshots).await.expect("document present");
    assert_eq!(present.id, "b");

    store.delete(&DocumentId::from("b"));
    assert_eq!(next(&mut snapshots).await, None);
}

#[tokio::test]
async fn test_observe_by_id() {
    let store = seeded(vec![task("a", 1, "open"), task("b", 2, "open")]);
    let live = engine(&store).observe_by_id::<Task, _>("a").await.unwrap();
    let mut snapshots = live.subscribe();
    assert_eq!(next(&mut snapshots).await.unwrap().priority, 1);

    // changes to other documents are filtered out by the feed
    store.update(task("b", 7, "open")).unwrap();
    store.update(task("a", 9, "open")).unwrap();
    assert_eq!(next(&mut snapshots).await.unwrap().priority, 9);

    store.delete(&DocumentId::from("a"));
    assert_eq!(next(&mut snapshots).await, None);
}

#[tokio::test]
async fn test_observe_by_numeric_id() {
    let store = seeded(vec![json!({"_id": 42, "name": "answer"})]);
    let live = engine(&store).observe_by_id::<Value, _>(&42).await.unwrap();
    let mut snapshots = live.subscribe();
    assert_eq!(next(&mut snapshots).await.unwrap()["name"], "answer");
}

#[tokio::test]
async fn test_observe_by_composite_id_fails() {
    let store = seeded(vec![]);
    let err = engine(&store)
        .observe_by_id::<Value, _>(&vec![1, 2])
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LiveError::IdentityMapping(_)));
    assert_eq!(store.stats().feeds_opened, 0);
}

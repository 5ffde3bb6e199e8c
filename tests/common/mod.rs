//! Shared fixtures for live query integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use aerodb_live::live::{
    Document, DocumentId, LiveQueryConfig, LiveQueryEngine, MemoryStore, Snapshot, Snapshots,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

/// Typed document used by tests that do not want raw JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub priority: i64,
    pub status: String,
}

impl Document for Task {
    fn id(&self) -> DocumentId {
        DocumentId::from(self.id.as_str())
    }
}

pub fn task(id: &str, priority: i64, status: &str) -> Value {
    json!({"_id": id, "title": format!("task {}", id), "priority": priority, "status": status})
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn seeded(documents: Vec<Value>) -> MemoryStore {
    MemoryStore::with_documents(documents).expect("seed documents")
}

pub fn engine(store: &MemoryStore) -> LiveQueryEngine {
    engine_with(store, LiveQueryConfig::for_collection("tasks"))
}

pub fn engine_with(store: &MemoryStore, config: LiveQueryConfig) -> LiveQueryEngine {
    init_tracing();
    LiveQueryEngine::new(Arc::new(store.clone()), config)
}

/// Next emitted value, failing the test if none arrives in time
pub async fn next<V>(snapshots: &mut Snapshots<V>) -> V {
    timeout(WAIT, snapshots.recv())
        .await
        .expect("timed out waiting for a snapshot")
        .expect("snapshot stream ended")
}

/// Assert nothing is emitted for a short while
pub async fn assert_quiet<V: std::fmt::Debug>(snapshots: &mut Snapshots<V>) {
    if let Ok(value) = timeout(Duration::from_millis(100), snapshots.recv()).await {
        panic!("unexpected emission: {:?}", value);
    }
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn ids(snapshot: &Snapshot<Value>) -> Vec<String> {
    snapshot
        .items
        .iter()
        .filter_map(|d| d["_id"].as_str().map(str::to_string))
        .collect()
}

pub fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

//! Live Query Configuration
//!
//! Engine-wide settings. Sorting and paging are per subscription and live in
//! [`QueryContext`](super::query::QueryContext) instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveQueryConfig {
    /// Identity field of stored documents (default: "_id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Collection label used in log fields (default: "documents")
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Interval of the reconciliation sweep in milliseconds (default: disabled)
    ///
    /// When set, every subscription periodically re-runs its snapshot query
    /// and emits if the window drifted, e.g. after an update made a document
    /// stop matching the filter.
    #[serde(default)]
    pub reconcile_interval_ms: Option<u64>,
}

fn default_id_field() -> String {
    "_id".to_string()
}

fn default_collection() -> String {
    "documents".to_string()
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            collection: default_collection(),
            reconcile_interval_ms: None,
        }
    }
}

impl LiveQueryConfig {
    /// Create a config for the given collection
    pub fn for_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Enable the reconciliation sweep
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Reconciliation interval, if enabled
    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

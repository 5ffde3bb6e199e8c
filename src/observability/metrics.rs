//! Metrics registry for live queries
//!
//! - Counters, plus one gauge for active subscriptions
//! - Thread-safe but lock-minimal
//! - Shared by every subscription of an engine; inject the same registry
//!   into several engines to aggregate them

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live query counters
///
/// All counters use atomic operations with Relaxed ordering; readers get an
/// eventually consistent view.
#[derive(Debug, Default)]
pub struct LiveMetrics {
    /// Subscriptions opened
    subscriptions_opened: AtomicU64,
    /// Subscriptions completed
    subscriptions_closed: AtomicU64,
    /// Setup failures surfaced to callers
    setup_failures: AtomicU64,
    /// Values pushed to output channels
    snapshots_emitted: AtomicU64,
    /// Change events that changed a window
    events_applied: AtomicU64,
    /// Change events that left a window untouched
    events_ignored: AtomicU64,
    /// Change events whose handling failed
    events_failed: AtomicU64,
    /// Feed read failures
    feed_failures: AtomicU64,
    /// Backfill fetches issued
    backfills: AtomicU64,
    /// Reconciliation sweeps that corrected a window
    reconciliations: AtomicU64,
}

impl LiveMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Lifecycle

    pub fn increment_subscriptions_opened(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subscriptions_closed(&self) {
        self.subscriptions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_setup_failures(&self) {
        self.setup_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Output

    pub fn increment_snapshots_emitted(&self) {
        self.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
    }

    // Tailing

    pub fn increment_events_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_feed_failures(&self) {
        self.feed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backfills(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconciliations(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    /// Subscriptions currently running
    pub fn active_subscriptions(&self) -> u64 {
        let opened = self.subscriptions_opened.load(Ordering::Relaxed);
        let closed = self.subscriptions_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
            subscriptions_closed: self.subscriptions_closed.load(Ordering::Relaxed),
            setup_failures: self.setup_failures.load(Ordering::Relaxed),
            snapshots_emitted: self.snapshots_emitted.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub subscriptions_opened: u64,
    pub subscriptions_closed: u64,
    pub setup_failures: u64,
    pub snapshots_emitted: u64,
    pub events_applied: u64,
    pub events_ignored: u64,
    pub events_failed: u64,
    pub feed_failures: u64,
    pub backfills: u64,
    pub reconciliations: u64,
}

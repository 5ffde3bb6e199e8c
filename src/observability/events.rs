//! Observability events for live queries
//!
//! Every lifecycle step of a live query is logged under one of these names,
//! so log pipelines can match on a stable string instead of free text.
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable live query events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Change feed opened and snapshot emitted
    Subscribed,
    /// Consumer completed the output channel
    Unsubscribed,
    /// Subscription cancelled (engine shutdown or cancellation source)
    Cancelled,
    /// Store ended the change feed
    CursorCompleted,
    /// Subscription resources released
    Cleanup,

    // Snapshot
    /// Initial snapshot taken
    SnapshotTaken,
    /// Setup failed before the subscription existed
    SetupFailed,

    // Tailing
    /// A change event changed the window
    EventApplied,
    /// A change event did not change the window
    EventIgnored,
    /// Applying a single change event failed
    EventFailed,
    /// Reading the change feed failed
    FeedFailed,
    /// Deletion backfilled from the store
    Backfilled,
    /// Change before the page start; page re-queried
    PageShifted,
    /// Re-reading the total from the store failed
    RecountFailed,
    /// Reconciliation sweep corrected the window
    Reconciled,
    /// Reconciliation sweep failed
    ReconcileFailed,

    // Engine
    /// Engine shutdown requested
    ShutdownStart,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            // Lifecycle
            Event::Subscribed => "LIVE_SUBSCRIBED",
            Event::Unsubscribed => "LIVE_UNSUBSCRIBED",
            Event::Cancelled => "LIVE_CANCELLED",
            Event::CursorCompleted => "LIVE_CURSOR_COMPLETED",
            Event::Cleanup => "LIVE_CLEANUP",

            // Snapshot
            Event::SnapshotTaken => "LIVE_SNAPSHOT_TAKEN",
            Event::SetupFailed => "LIVE_SETUP_FAILED",

            // Tailing
            Event::EventApplied => "LIVE_EVENT_APPLIED",
            Event::EventIgnored => "LIVE_EVENT_IGNORED",
            Event::EventFailed => "LIVE_EVENT_FAILED",
            Event::FeedFailed => "LIVE_FEED_FAILED",
            Event::Backfilled => "LIVE_BACKFILLED",
            Event::PageShifted => "LIVE_PAGE_SHIFTED",
            Event::RecountFailed => "LIVE_RECOUNT_FAILED",
            Event::Reconciled => "LIVE_RECONCILED",
            Event::ReconcileFailed => "LIVE_RECONCILE_FAILED",

            // Engine
            Event::ShutdownStart => "LIVE_SHUTDOWN_START",
        }
    }

    /// Returns true if this event is logged at warning level
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::EventFailed
                | Event::FeedFailed
                | Event::SetupFailed
                | Event::ReconcileFailed
                | Event::RecountFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

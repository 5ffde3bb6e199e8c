//! Observability for live queries
//!
//! - Typed lifecycle events, logged through `tracing`
//! - Counters shared by all subscriptions of an engine
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. Stable event names, structured fields
//!
//! # Usage
//!
//! ```ignore
//! use aerodb_live::observability::{Event, LiveMetrics};
//!
//! tracing::trace!(event = %Event::Subscribed, subscription_id = %id);
//!
//! let metrics = LiveMetrics::new();
//! metrics.increment_snapshots_emitted();
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{LiveMetrics, MetricsSnapshot};

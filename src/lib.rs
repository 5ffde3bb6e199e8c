//! aerodb-live - Live queries for AeroDB
//!
//! Turns a one-shot filtered, sorted and paged query into a continuously
//! updated result, driven by the store's change feed.

pub mod live;
pub mod observability;

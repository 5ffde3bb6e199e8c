//! # Store Interfaces
//!
//! What the engine needs from a document store: one-shot queries, counts and
//! a change-feed subscription. The store client is shared across
//! subscriptions; each feed handle belongs to exactly one.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::LiveResult;
use super::event::ChangeEvent;
use super::filter::NativeFilter;
use super::query::Sorting;

/// A document store with a change feed
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Run a query once, returning matching documents in sort order
    async fn find(
        &self,
        filter: &NativeFilter,
        sorting: Option<&Sorting>,
        skip: usize,
        limit: Option<usize>,
    ) -> LiveResult<Vec<Value>>;

    /// Count documents matching `filter`, ignoring paging
    async fn count(&self, filter: &NativeFilter) -> LiveResult<u64>;

    /// Open a change feed filtered by `feed_filter`
    ///
    /// Events produced after this returns must be queued by the handle until
    /// read, so nothing is lost while the caller takes its snapshot.
    async fn watch(&self, feed_filter: &NativeFilter) -> LiveResult<Box<dyn ChangeFeed>>;
}

/// A handle on an open change feed
#[async_trait]
pub trait ChangeFeed: Send {
    /// Next event in store order
    ///
    /// `None` when the store ended the feed; an error when the read itself
    /// failed. Either ends the subscription reading it.
    async fn next(&mut self) -> Option<LiveResult<ChangeEvent>>;

    /// Release the store-side cursor
    fn close(self: Box<Self>);
}

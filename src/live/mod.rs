//! # Live Queries
//!
//! A live query is a filtered, sorted and optionally paged query whose result
//! is kept current from the store's change feed and pushed to consumers as a
//! stream of snapshots.
//!
//! ## Architecture
//!
//! - **Filter** (`filter`): typed predicate and its native translation
//! - **Change filter** (`change_filter`): feed-level filter over event envelopes
//! - **Result window** (`window`): identity-keyed, ordered visible documents
//! - **Query context** (`query`): sorting, paging and the running total
//! - **Engine** (`engine`): snapshot, tail, emit, clean up
//! - **Output channel** (`channel`): single-slot replay multicast
//! - **Memory store** (`memory`): in-process store with a change feed
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use aerodb_live::live::{Filter, LiveQueryConfig, LiveQueryEngine, MemoryStore, Sorting};
//!
//! let store = MemoryStore::default();
//! let engine = LiveQueryEngine::new(Arc::new(store.clone()), LiveQueryConfig::default());
//!
//! let live = engine
//!     .observe::<serde_json::Value>(&Filter::gte("score", 10), Some(Sorting::desc("score")), None)
//!     .await?;
//! let mut snapshots = live.subscribe();
//! while let Some(snapshot) = snapshots.recv().await {
//!     println!("{} of {}", snapshot.items.len(), snapshot.total_items);
//! }
//! ```

pub mod change_filter;
pub mod channel;
pub mod config;
pub mod document;
pub mod engine;
pub mod errors;
pub mod event;
pub mod filter;
pub mod matcher;
pub mod memory;
pub mod query;
pub mod store;
pub mod window;

pub use change_filter::ChangeFilterBuilder;
pub use channel::{CompletionReason, ReplaySubject, Snapshots};
pub use config::LiveQueryConfig;
pub use document::{Document, DocumentId};
pub use engine::{LiveQuery, LiveQueryEngine, Snapshot};
pub use errors::{LiveError, LiveResult};
pub use event::{ChangeEvent, OperationType};
pub use filter::{prefix_fields, translate, Filter, NativeFilter};
pub use memory::{MemoryStore, MemoryStoreConfig, MemoryStoreStats};
pub use query::{Paging, QueryContext, SortDirection, Sorting};
pub use store::{ChangeFeed, DocumentStore};
pub use window::ResultWindow;

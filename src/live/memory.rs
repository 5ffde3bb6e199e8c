//! # In-Memory Store
//!
//! A [`DocumentStore`] keeping one collection in process. Every mutation is
//! published to the open change feeds whose filter matches the event
//! envelope, in mutation order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::document::DocumentId;
use super::errors::{LiveError, LiveResult};
use super::event::ChangeEvent;
use super::filter::NativeFilter;
use super::matcher;
use super::query::{lookup_path, Sorting};
use super::store::{ChangeFeed, DocumentStore};

/// In-memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Identity field of stored documents (default: "_id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Collection name (default: "documents")
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_id_field() -> String {
    "_id".to_string()
}

fn default_collection() -> String {
    "documents".to_string()
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            collection: default_collection(),
        }
    }
}

/// Store-side counters, mostly useful to tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub finds: u64,
    pub counts: u64,
    pub feeds_opened: u64,
    pub feeds_closed: u64,
}

struct Watcher {
    filter: NativeFilter,
    sender: mpsc::UnboundedSender<LiveResult<ChangeEvent>>,
}

struct MemoryInner {
    config: MemoryStoreConfig,
    documents: RwLock<Vec<Value>>,
    watchers: Mutex<HashMap<u64, Watcher>>,
    next_watcher: AtomicU64,
    unavailable: AtomicBool,
    finds: AtomicU64,
    counts: AtomicU64,
    feeds_opened: AtomicU64,
    feeds_closed: AtomicU64,
}

impl MemoryInner {
    fn documents(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn documents_mut(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<u64, Watcher>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, watcher_id: u64) {
        if self.watchers().remove(&watcher_id).is_some() {
            self.feeds_closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// In-process document collection with a change feed
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                config,
                documents: RwLock::new(Vec::new()),
                watchers: Mutex::new(HashMap::new()),
                next_watcher: AtomicU64::new(1),
                unavailable: AtomicBool::new(false),
                finds: AtomicU64::new(0),
                counts: AtomicU64::new(0),
                feeds_opened: AtomicU64::new(0),
                feeds_closed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a store pre-populated with `documents`, without feed events
    pub fn with_documents(documents: Vec<Value>) -> LiveResult<Self> {
        let store = Self::default();
        {
            let mut held = store.inner.documents_mut();
            for document in documents {
                let id = store.id_of(&document)?;
                if held.iter().any(|d| store.id_of(d).ok().as_ref() == Some(&id)) {
                    return Err(LiveError::store(format!("duplicate id {}", id)));
                }
                held.push(document);
            }
        }
        Ok(store)
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.inner.config
    }

    fn id_of(&self, document: &Value) -> LiveResult<DocumentId> {
        lookup_path(document, &self.inner.config.id_field)
            .filter(|id| !id.is_null())
            .map(|id| DocumentId::new(id.clone()))
            .ok_or_else(|| {
                LiveError::IdentityMapping(format!("document has no {} field", self.inner.config.id_field))
            })
    }

    fn position(&self, documents: &[Value], id: &DocumentId) -> Option<usize> {
        documents
            .iter()
            .position(|d| lookup_path(d, &self.inner.config.id_field) == Some(id.as_value()))
    }

    /// Insert a new document
    pub fn insert(&self, document: Value) -> LiveResult<DocumentId> {
        let id = self.id_of(&document)?;
        let mut documents = self.inner.documents_mut();
        if self.position(&documents, &id).is_some() {
            return Err(LiveError::store(format!("duplicate id {}", id)));
        }
        documents.push(document.clone());
        self.publish(ChangeEvent::insert(id.clone(), document));
        Ok(id)
    }

    /// Modify an existing document; the feed carries the post-image
    pub fn update(&self, document: Value) -> LiveResult<()> {
        self.overwrite(document, ChangeEvent::update)
    }

    /// Replace an existing document wholesale
    pub fn replace(&self, document: Value) -> LiveResult<()> {
        self.overwrite(document, ChangeEvent::replace)
    }

    fn overwrite(&self, document: Value, event: fn(DocumentId, Value) -> ChangeEvent) -> LiveResult<()> {
        let id = self.id_of(&document)?;
        let mut documents = self.inner.documents_mut();
        let pos = self
            .position(&documents, &id)
            .ok_or_else(|| LiveError::store(format!("no document with id {}", id)))?;
        documents[pos] = document.clone();
        self.publish(event(id, document));
        Ok(())
    }

    /// Delete a document; false if it did not exist
    pub fn delete(&self, id: &DocumentId) -> bool {
        let mut documents = self.inner.documents_mut();
        match self.position(&documents, id) {
            Some(pos) => {
                documents.remove(pos);
                self.publish(ChangeEvent::delete(id.clone()));
                true
            }
            None => false,
        }
    }

    /// Push a raw event to every matching feed without touching documents
    ///
    /// Simulates duplicate or delayed deliveries from a real store.
    pub fn publish(&self, event: ChangeEvent) {
        let envelope = event.to_envelope();
        self.inner.watchers().retain(|_, watcher| {
            // an unevaluable filter is the subscriber's problem; deliver it
            let wanted = matcher::matches(&envelope, &watcher.filter).unwrap_or(true);
            !wanted || watcher.sender.send(Ok(event.clone())).is_ok()
        });
    }

    /// Fail every open feed with `error`
    pub fn fail_feeds(&self, error: LiveError) {
        for watcher in self.inner.watchers().values() {
            let _ = watcher.sender.send(Err(error.clone()));
        }
    }

    /// End every open feed as if the store closed its cursors
    pub fn end_feeds(&self) {
        let mut watchers = self.inner.watchers();
        let ended = watchers.len() as u64;
        watchers.clear();
        self.inner.feeds_closed.fetch_add(ended, Ordering::Relaxed);
    }

    /// Make queries and counts fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> LiveResult<()> {
        if self.inner.unavailable.load(Ordering::Relaxed) {
            return Err(LiveError::store("store unavailable"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of feeds currently open
    pub fn open_feeds(&self) -> usize {
        self.inner.watchers().len()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            finds: self.inner.finds.load(Ordering::Relaxed),
            counts: self.inner.counts.load(Ordering::Relaxed),
            feeds_opened: self.inner.feeds_opened.load(Ordering::Relaxed),
            feeds_closed: self.inner.feeds_closed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        filter: &NativeFilter,
        sorting: Option<&Sorting>,
        skip: usize,
        limit: Option<usize>,
    ) -> LiveResult<Vec<Value>> {
        self.inner.finds.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let mut matched = Vec::new();
        for document in self.inner.documents().iter() {
            if matcher::matches(document, filter)? {
                matched.push(document.clone());
            }
        }
        if let Some(sorting) = sorting {
            matched.sort_by(|a, b| sorting.compare(a, b));
        }

        let page = matched.into_iter().skip(skip);
        Ok(match limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn count(&self, filter: &NativeFilter) -> LiveResult<u64> {
        self.inner.counts.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let mut total = 0;
        for document in self.inner.documents().iter() {
            if matcher::matches(document, filter)? {
                total += 1;
            }
        }
        Ok(total)
    }

    async fn watch(&self, feed_filter: &NativeFilter) -> LiveResult<Box<dyn ChangeFeed>> {
        self.check_available()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher_id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.inner.watchers().insert(
            watcher_id,
            Watcher {
                filter: feed_filter.clone(),
                sender: tx,
            },
        );
        self.inner.feeds_opened.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryFeed {
            watcher_id,
            receiver: rx,
            store: Arc::downgrade(&self.inner),
        }))
    }
}

/// Change feed handle over a [`MemoryStore`]
struct MemoryFeed {
    watcher_id: u64,
    receiver: mpsc::UnboundedReceiver<LiveResult<ChangeEvent>>,
    store: Weak<MemoryInner>,
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn next(&mut self) -> Option<LiveResult<ChangeEvent>> {
        self.receiver.recv().await
    }

    fn close(self: Box<Self>) {
        // Drop releases the watcher
    }
}

impl Drop for MemoryFeed {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.release(self.watcher_id);
        }
    }
}

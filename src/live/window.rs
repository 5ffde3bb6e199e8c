//! # Result Window
//!
//! The ordered, identity-keyed set of documents a live query currently
//! reports. Every mutation answers whether the visible state changed so the
//! engine can skip no-op emissions.
//!
//! ## Invariants
//!
//! - No two entries share an identity.
//! - With a capacity, `len() <= capacity` after every operation.

use std::cmp::Ordering;
use std::future::Future;

use serde_json::Value;
use tracing::warn;

use super::document::{Document, DocumentId, DEFAULT_ID_FIELD};
use super::errors::LiveResult;
use super::query::Sorting;

#[derive(Debug, Clone)]
struct Entry<T> {
    id: DocumentId,
    sort_key: Option<Value>,
    document: T,
}

/// Consumer-visible documents of one live query
#[derive(Debug, Clone)]
pub struct ResultWindow<T> {
    entries: Vec<Entry<T>>,
    capacity: Option<usize>,
    sorting: Option<Sorting>,
    id_field: String,
}

impl<T: Document> ResultWindow<T> {
    /// Create an empty window
    ///
    /// `capacity` bounds the window (page size, or 1 for single-document
    /// queries). With `sorting`, new documents are placed at their sort
    /// position instead of being appended.
    pub fn new(capacity: Option<usize>, sorting: Option<Sorting>) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            sorting,
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }

    /// Read identities from `id_field` instead of `_id`
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Identity of `document` as this window keys it
    pub fn id_of(&self, document: &T) -> DocumentId {
        document.id_at(&self.id_field)
    }

    /// Unbounded, unsorted window
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Replace the contents wholesale
    pub fn initialize(&mut self, seed: Vec<T>) {
        self.entries.clear();
        for document in seed {
            let entry = self.entry(document);
            match self.position(&entry.id) {
                Some(pos) => self.entries[pos] = entry,
                None => self.entries.push(entry),
            }
        }
        if let Some(capacity) = self.capacity {
            self.entries.truncate(capacity);
        }
    }

    /// Insert or replace a document by identity
    ///
    /// A known identity is replaced in place, keeping its position; the
    /// result is false when the replacement equals the held document. A new
    /// identity is appended, or placed by sort key when sorted. If that
    /// overflows the capacity the tail is dropped, and the result is false
    /// when the dropped tail is the new document itself.
    pub fn upsert(&mut self, document: T) -> bool {
        let entry = self.entry(document);

        if let Some(pos) = self.position(&entry.id) {
            if self.entries[pos].document == entry.document {
                return false;
            }
            self.entries[pos] = entry;
            return true;
        }

        let index = match &self.sorting {
            Some(sorting) => self.entries.partition_point(|held| {
                sorting.compare_keys(held.sort_key.as_ref(), entry.sort_key.as_ref()) != Ordering::Greater
            }),
            None => self.entries.len(),
        };
        self.entries.insert(index, entry);

        match self.capacity {
            Some(capacity) if self.entries.len() > capacity => {
                self.entries.truncate(capacity);
                index < capacity
            }
            _ => true,
        }
    }

    /// Remove a document by identity; false if it is not held
    pub fn remove(&mut self, id: &DocumentId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove a document and refill the vacated page slot
    ///
    /// `fetch_next` receives the number of documents still held and returns
    /// the next document beyond them, if any. It is only invoked when a
    /// removal actually happened. A failed fetch leaves the window one short;
    /// the removal still counts as a change.
    pub async fn remove_and_backfill<F, Fut>(&mut self, id: &DocumentId, fetch_next: F) -> bool
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = LiveResult<Option<T>>>,
    {
        if !self.remove(id) {
            return false;
        }

        match fetch_next(self.entries.len()).await {
            Ok(Some(next)) => {
                let entry = self.entry(next);
                if self.position(&entry.id).is_none() && !self.is_full() {
                    self.entries.push(entry);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(id = %id, error = %e, "backfill fetch failed");
            }
        }
        true
    }

    /// Whether `id` is currently visible
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Whether the window is at its capacity
    pub fn is_full(&self) -> bool {
        self.capacity.map(|c| self.entries.len() >= c).unwrap_or(false)
    }

    /// Visible documents in window order
    pub fn documents(&self) -> Vec<T> {
        self.entries.iter().map(|e| e.document.clone()).collect()
    }

    /// First visible document
    pub fn first(&self) -> Option<&T> {
        self.entries.first().map(|e| &e.document)
    }

    /// Visible identities in window order
    pub fn ids(&self) -> Vec<DocumentId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Whether the window holds exactly `documents`, in order
    pub fn matches(&self, documents: &[T]) -> bool {
        self.entries.len() == documents.len()
            && self.entries.iter().zip(documents).all(|(e, d)| &e.document == d)
    }

    /// Whether a new `document` would land before every held document
    ///
    /// An empty window is preceded by anything. Without sorting, new
    /// documents go to the end and never precede a held one.
    pub fn precedes(&self, document: &T) -> bool {
        if self.contains(&self.id_of(document)) {
            return false;
        }
        let Some(first) = self.entries.first() else {
            return true;
        };
        match &self.sorting {
            Some(sorting) => {
                sorting.compare_keys(self.sort_key(document).as_ref(), first.sort_key.as_ref()) == Ordering::Less
            }
            None => false,
        }
    }

    fn position(&self, id: &DocumentId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    fn sort_key(&self, document: &T) -> Option<Value> {
        self.sorting.as_ref().and_then(|sorting| {
            serde_json::to_value(document)
                .ok()
                .and_then(|body| sorting.key_of(&body).cloned())
        })
    }

    fn entry(&self, document: T) -> Entry<T> {
        Entry {
            id: self.id_of(&document),
            sort_key: self.sort_key(&document),
            document,
        }
    }
}

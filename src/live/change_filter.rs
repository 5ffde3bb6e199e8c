//! # Change Feed Filters
//!
//! Builds the feed-level filter for a live query. Feed filters are evaluated
//! against the change envelope, not the document, so every field reference is
//! moved under `fullDocument.`.
//!
//! Deleted documents have no body in the envelope and cannot be tested
//! against the caller's filter at the source. The feed filter therefore
//! admits every delete in the collection, and the engine decides relevance
//! locally by window membership.

use serde_json::{json, Value};

use super::errors::LiveResult;
use super::event::OperationType;
use super::filter::{self, Filter, NativeFilter};

/// Envelope field holding the document post-image
pub const FULL_DOCUMENT_FIELD: &str = "fullDocument";

/// Builds change-feed filters from caller filters
#[derive(Debug, Clone)]
pub struct ChangeFilterBuilder {
    operations: Vec<OperationType>,
}

impl Default for ChangeFilterBuilder {
    fn default() -> Self {
        Self {
            operations: OperationType::ALL.to_vec(),
        }
    }
}

impl ChangeFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the feed filter for `filter`
    pub fn build(&self, filter: &Filter) -> LiveResult<NativeFilter> {
        let translated = filter::translate(filter)?;
        self.build_native(&translated)
    }

    /// Build the feed filter from an already translated filter
    ///
    /// `(operationType in ops AND prefixed filter) OR fullDocument is absent`
    pub fn build_native(&self, translated: &NativeFilter) -> LiveResult<NativeFilter> {
        let operations: Vec<Value> = self
            .operations
            .iter()
            .map(|op| Value::String(op.as_str().to_string()))
            .collect();

        let mut matching = vec![json!({ "operationType": { "$in": operations } })];
        if !translated.is_match_all() {
            let prefix = format!("{}.", FULL_DOCUMENT_FIELD);
            matching.push(filter::prefix_fields(translated, &prefix).into_value());
        }

        NativeFilter::new(json!({
            "$or": [
                { "$and": matching },
                { "fullDocument": Value::Null },
            ]
        }))
    }
}

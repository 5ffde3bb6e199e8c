//! # Documents and Identities
//!
//! The engine is generic over the document type. Documents cross the store
//! boundary as JSON and are mapped to Rust types through serde.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{LiveError, LiveResult};
use super::query::lookup_path;

/// Store-native document identity
///
/// Held as the JSON representation the store uses, so string, numeric and
/// UUID keys compare the way the store compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Value);

impl DocumentId {
    /// Wrap a raw store identity
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Convert a concept-typed identity into the store representation
    pub fn from_concept<I: Serialize + ?Sized>(id: &I) -> LiveResult<Self> {
        let value = serde_json::to_value(id)
            .map_err(|e| LiveError::IdentityMapping(e.to_string()))?;
        if value.is_null() || value.is_object() || value.is_array() {
            return Err(LiveError::IdentityMapping(format!(
                "identity must be a scalar, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Raw store representation
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(Value::String(s))
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        Self(Value::from(n))
    }
}

impl From<uuid::Uuid> for DocumentId {
    fn from(id: uuid::Uuid) -> Self {
        Self(Value::String(id.to_string()))
    }
}

/// Identity field used when none is configured
pub const DEFAULT_ID_FIELD: &str = "_id";

/// A record observable through a live query
pub trait Document: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// Identity of this document
    fn id(&self) -> DocumentId;

    /// Identity under the store's configured identity field
    ///
    /// Typed documents carry their identity themselves and ignore the field.
    fn id_at(&self, _id_field: &str) -> DocumentId {
        self.id()
    }
}

/// Raw JSON documents, identified by a (possibly dotted) identity field
impl Document for Value {
    fn id(&self) -> DocumentId {
        self.id_at(DEFAULT_ID_FIELD)
    }

    fn id_at(&self, id_field: &str) -> DocumentId {
        DocumentId(lookup_path(self, id_field).cloned().unwrap_or(Value::Null))
    }
}

/// Map a raw store document into `T`
pub(crate) fn from_store<T: Document>(raw: Value) -> LiveResult<T> {
    serde_json::from_value(raw).map_err(|e| LiveError::IdentityMapping(e.to_string()))
}

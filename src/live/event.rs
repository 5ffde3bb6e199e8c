//! # Change Events
//!
//! The change-feed envelope delivered by the store for every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::document::DocumentId;

/// Kind of mutation carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// New document inserted
    Insert,
    /// Existing document modified in place
    Update,
    /// Existing document replaced wholesale
    Replace,
    /// Document deleted; the body is no longer available
    Delete,
}

impl OperationType {
    /// Every operation a live query listens to
    pub const ALL: [OperationType; 4] = [
        OperationType::Insert,
        OperationType::Update,
        OperationType::Replace,
        OperationType::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Replace => "replace",
            OperationType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single change-feed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Kind of mutation
    pub operation_type: OperationType,

    /// Identity of the mutated document
    #[serde(rename = "documentKey", with = "document_key")]
    pub document_id: DocumentId,

    /// Post-image of the document; absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,

    /// Time the store applied the mutation
    pub cluster_time: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an insert event
    pub fn insert(document_id: DocumentId, document: Value) -> Self {
        Self::with_document(OperationType::Insert, document_id, document)
    }

    /// Create an update event carrying the post-image
    pub fn update(document_id: DocumentId, document: Value) -> Self {
        Self::with_document(OperationType::Update, document_id, document)
    }

    /// Create a replace event
    pub fn replace(document_id: DocumentId, document: Value) -> Self {
        Self::with_document(OperationType::Replace, document_id, document)
    }

    /// Create a delete event
    pub fn delete(document_id: DocumentId) -> Self {
        Self {
            operation_type: OperationType::Delete,
            document_id,
            full_document: None,
            cluster_time: Utc::now(),
        }
    }

    fn with_document(operation_type: OperationType, document_id: DocumentId, document: Value) -> Self {
        Self {
            operation_type,
            document_id,
            full_document: Some(document),
            cluster_time: Utc::now(),
        }
    }

    /// Envelope as the store presents it to feed filters
    pub fn to_envelope(&self) -> Value {
        let mut envelope = json!({
            "operationType": self.operation_type.as_str(),
            "documentKey": { "_id": self.document_id.as_value() },
            "clusterTime": self.cluster_time.to_rfc3339(),
        });
        if let (Some(body), Some(map)) = (&self.full_document, envelope.as_object_mut()) {
            map.insert("fullDocument".to_string(), body.clone());
        }
        envelope
    }
}

/// `documentKey` is `{ "_id": <id> }` on the wire
mod document_key {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::DocumentId;

    #[derive(Serialize, Deserialize)]
    struct DocumentKey {
        #[serde(rename = "_id")]
        id: DocumentId,
    }

    pub fn serialize<S: Serializer>(id: &DocumentId, serializer: S) -> Result<S::Ok, S::Error> {
        DocumentKey { id: id.clone() }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DocumentId, D::Error> {
        DocumentKey::deserialize(deserializer).map(|key| key.id)
    }
}

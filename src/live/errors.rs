//! # Live Query Errors
//!
//! Error types for the live query engine.

use thiserror::Error;

/// Result type for live query operations
pub type LiveResult<T> = Result<T, LiveError>;

/// Live query errors
#[derive(Debug, Clone, Error)]
pub enum LiveError {
    // ==================
    // Setup Errors
    // ==================
    /// Filter could not be translated to the store dialect
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Identity could not be mapped to or from the store representation
    #[error("Identity mapping failed: {0}")]
    IdentityMapping(String),

    // ==================
    // Store Errors
    // ==================
    /// Query, count or watch failed in the backing store
    #[error("Store error: {0}")]
    Store(String),

    /// Change feed handle was closed or disposed
    #[error("Change feed closed")]
    FeedClosed,

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    // ==================
    // Document Errors
    // ==================
    /// Document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Change event had an unexpected shape
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),

    // ==================
    // Internal Errors
    // ==================
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveError {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an invalid filter error
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    /// Returns true when the error is the normal result of tearing a feed down
    ///
    /// These end a subscription quietly (trace level); everything else is
    /// logged as a warning.
    pub fn is_expected_shutdown(&self) -> bool {
        matches!(self, LiveError::FeedClosed | LiveError::Cancelled)
    }

    /// Error code for log fields
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::InvalidFilter(_) => "INVALID_FILTER",
            LiveError::IdentityMapping(_) => "IDENTITY_MAPPING",
            LiveError::Store(_) => "STORE_ERROR",
            LiveError::FeedClosed => "FEED_CLOSED",
            LiveError::Cancelled => "CANCELLED",
            LiveError::Serialization(_) => "SERIALIZATION_ERROR",
            LiveError::MalformedEvent(_) => "MALFORMED_EVENT",
            LiveError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

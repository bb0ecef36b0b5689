//! Error types for store operations

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when talking to the shared store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed document does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Document kind (e.g. "step")
        kind: &'static str,
        /// Document id
        id: String,
    },

    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored document holds a value this poller cannot interpret
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connection(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

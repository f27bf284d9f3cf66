//! Error types for spantrack-store crate

use thiserror::Error;

/// Errors raised by span stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// No span is stored under this identity
    #[error("Span not found: {trace_id}/{span_id}")]
    NotFound { trace_id: String, span_id: String },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        StoreError::NotFound {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

//! Search index error types.
//!
//! This module defines the error types that can occur during search index operations.

use thiserror::Error;

/// Errors that can occur during search index operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchIndexError {
    /// The index could not be reached or is refusing writes.
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// The index rejected the document.
    #[error("Document rejected: {0}")]
    Rejected(String),

    /// Failed to serialize the document.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SearchIndexError {
    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a rejected error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

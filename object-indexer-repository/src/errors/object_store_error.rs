//! Object store error types.
//!
//! This module defines the error types that can occur during object store operations.

use thiserror::Error;

/// Errors that can occur while talking to the object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// The bucket or key does not exist.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The credentials in use may not perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A conditional request lost against a concurrent writer.
    #[error("Precondition failed: expected etag {expected}, found {actual}")]
    PreconditionFailed { expected: String, actual: String },

    /// Network failure, throttling, or an unavailable backend.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The stored bytes did not match what was written.
    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl ObjectStoreError {
    /// Create a not found error.
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a precondition failed error.
    pub fn precondition_failed(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create an integrity error.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }
}

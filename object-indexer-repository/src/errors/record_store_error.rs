//! Pipeline record store error types.

use thiserror::Error;

use object_indexer_shared::RecordKey;

/// Errors from the pipeline record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreError {
    /// A conditional write lost: someone else updated the record first.
    #[error("Version conflict on {key}: expected {expected}, found {found}")]
    VersionConflict {
        key: RecordKey,
        expected: u64,
        found: u64,
    },

    /// An insert raced with another insert for the same key.
    #[error("Record already exists: {0}")]
    AlreadyExists(RecordKey),

    /// An update targeted a record that does not exist.
    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    /// The backing storage failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RecordStoreError {
    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

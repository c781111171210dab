//! Dead-letter sink error types.

use thiserror::Error;

/// Errors from publishing a dead-letter record.
#[derive(Error, Debug)]
pub enum DeadLetterError {
    /// Failed to write the record.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize the record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for the object indexer pipeline.

use thiserror::Error;

use object_indexer_repository::{DeadLetterError, RecordStoreError, SearchIndexError};
use object_indexer_shared::ErrorKind;

/// Errors that can occur in the pipeline outside of stage execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A notification could not be turned into a work item.
    #[error("Intake error: {0}")]
    IntakeError(#[from] IntakeError),

    /// Error from the pipeline record store.
    #[error("Record store error: {0}")]
    RecordStoreError(#[from] RecordStoreError),

    /// Error from the search index outside of a stage run.
    #[error("Search index error: {0}")]
    SearchIndexError(#[from] SearchIndexError),

    /// A dead-letter record could not be published.
    #[error("Dead-letter error: {0}")]
    DeadLetterError(#[from] DeadLetterError),

    /// An operation was requested on a record in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Channel communication error.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A worker task panicked or was aborted.
    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl PipelineError {
    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelError(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::WorkerError(msg.into())
    }
}

/// Errors raised by event intake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// A required field is missing or unreadable.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// No target bucket is configured for the source bucket.
    #[error("No route for bucket: {0}")]
    UnroutedBucket(String),

    /// The notification document is not valid JSON.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl IntakeError {
    /// Create a malformed event error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}

/// Failure of a single stage attempt, reported to the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

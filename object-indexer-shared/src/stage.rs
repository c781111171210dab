//! Pipeline stages, their outcomes, and the failure taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One durable, independently retryable step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Replication,
    Enrichment,
    MetadataCommit,
    Indexing,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [
        Stage::Replication,
        Stage::Enrichment,
        Stage::MetadataCommit,
        Stage::Indexing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Replication => "replication",
            Stage::Enrichment => "enrichment",
            Stage::MetadataCommit => "metadata_commit",
            Stage::Indexing => "indexing",
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Replication => Some(Stage::Enrichment),
            Stage::Enrichment => Some(Stage::MetadataCommit),
            Stage::MetadataCommit => Some(Stage::Indexing),
            Stage::Indexing => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Success,
    Failed,
    /// The stage gave up but the pipeline continued (degraded enrichment).
    Skipped,
}

/// Coarse failure class that drives the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network, timeout, unavailable. Retried with backoff.
    Transient,
    /// Version or etag mismatch. Bounded refetch-and-retry inside the stage.
    Conflict,
    /// Not found, permission denied, malformed input. Never retried.
    Permanent,
    /// Partial result explicitly flagged; the pipeline continues.
    Degraded,
}

/// Concrete failure kinds reported by intake and the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedEvent,
    SourceNotFound,
    PermissionDenied,
    CopyIntegrityMismatch,
    TransientIo,
    ReplicaMissing,
    EnrichmentProviderError,
    EnrichmentTimeout,
    EnrichmentDegraded,
    ConcurrentModification,
    IndexUnavailable,
    IndexRejected,
    InvalidState,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::CopyIntegrityMismatch
            | ErrorKind::TransientIo
            | ErrorKind::EnrichmentProviderError
            | ErrorKind::EnrichmentTimeout
            | ErrorKind::IndexUnavailable => ErrorClass::Transient,
            ErrorKind::ConcurrentModification => ErrorClass::Conflict,
            ErrorKind::EnrichmentDegraded => ErrorClass::Degraded,
            ErrorKind::MalformedEvent
            | ErrorKind::SourceNotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::ReplicaMissing
            | ErrorKind::IndexRejected
            | ErrorKind::InvalidState => ErrorClass::Permanent,
        }
    }

    /// Whether the coordinator may spend retry budget on this failure.
    ///
    /// Conflicts are already retried inside the metadata commit stage, so by
    /// the time one reaches the coordinator its bound is exhausted.
    pub fn is_retryable(self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedEvent => "MalformedEvent",
            ErrorKind::SourceNotFound => "SourceNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::CopyIntegrityMismatch => "CopyIntegrityMismatch",
            ErrorKind::TransientIo => "TransientIOError",
            ErrorKind::ReplicaMissing => "ReplicaMissing",
            ErrorKind::EnrichmentProviderError => "EnrichmentProviderError",
            ErrorKind::EnrichmentTimeout => "EnrichmentTimeout",
            ErrorKind::EnrichmentDegraded => "EnrichmentDegraded",
            ErrorKind::ConcurrentModification => "ConcurrentModification",
            ErrorKind::IndexUnavailable => "IndexUnavailable",
            ErrorKind::IndexRejected => "IndexRejected",
            ErrorKind::InvalidState => "InvalidState",
        };
        f.write_str(name)
    }
}

/// Result of one stage attempt, appended to the pipeline record history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub timestamp: DateTime<Utc>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Zero for the first attempt of the stage in this run.
    pub retry_count: u32,
}

impl StageOutcome {
    pub fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            timestamp: Utc::now(),
            error_kind: None,
            error_message: None,
            retry_count: 0,
        }
    }

    pub fn success(stage: Stage, retry_count: u32) -> Self {
        Self {
            status: StageStatus::Success,
            retry_count,
            ..Self::pending(stage)
        }
    }

    pub fn failed(
        stage: Stage,
        kind: ErrorKind,
        message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            status: StageStatus::Failed,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            retry_count,
            ..Self::pending(stage)
        }
    }

    pub fn skipped(
        stage: Stage,
        kind: ErrorKind,
        message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            status: StageStatus::Skipped,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            retry_count,
            ..Self::pending(stage)
        }
    }
}

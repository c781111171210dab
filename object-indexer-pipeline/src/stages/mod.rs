//! The four pipeline stages.
//!
//! Each stage reads the durable outputs of the previous ones from the pipeline
//! record, makes its collaborator calls, and reports either a `StageEffect` to
//! apply or a classified `StageError`. Stages never retry on their own except
//! for the metadata commit's bounded conflict loop; every other retry decision
//! belongs to the coordinator.

mod enrichment;
mod fingerprint;
mod indexing;
mod metadata_commit;
mod replication;

pub use enrichment::{EnrichmentConfig, EnrichmentFailurePolicy, EnrichmentStage};
pub use fingerprint::ContentFingerprinter;
pub use indexing::{IndexingConfig, IndexingStage, DEFAULT_INDEX_CLASS};
pub use metadata_commit::{MetadataCommitConfig, MetadataCommitStage};
pub use replication::{ReplicationConfig, ReplicationStage};

use std::sync::Arc;

use crate::errors::StageError;
use object_indexer_repository::{EnrichmentProvider, ObjectStore, ObjectStoreError, SearchIndex};
use object_indexer_shared::{EnrichedMetadata, ErrorKind, ObjectSnapshot, PipelineRecord, Stage};

/// Durable output of a successful stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEffect {
    Replicated(ObjectSnapshot),
    Enriched(EnrichedMetadata),
    MetadataCommitted { etag: String },
    Indexed,
}

impl StageEffect {
    /// Store the output on the record.
    pub fn apply(self, record: &mut PipelineRecord) {
        match self {
            StageEffect::Replicated(replica) => record.replica = Some(replica),
            StageEffect::Enriched(metadata) => record.enrichment = Some(metadata),
            StageEffect::MetadataCommitted { etag } => record.committed_etag = Some(etag),
            StageEffect::Indexed => {}
        }
    }
}

/// Configuration for all stages.
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    pub replication: ReplicationConfig,
    pub enrichment: EnrichmentConfig,
    pub metadata_commit: MetadataCommitConfig,
    pub indexing: IndexingConfig,
}

/// The stage implementations wired to their collaborators.
pub struct StageSet {
    fingerprinter: ContentFingerprinter,
    replication: ReplicationStage,
    enrichment: EnrichmentStage,
    metadata_commit: MetadataCommitStage,
    indexing: IndexingStage,
}

impl StageSet {
    /// Create the stages with default configuration.
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        provider: Arc<dyn EnrichmentProvider>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self::with_config(object_store, provider, index, StageConfig::default())
    }

    /// Create the stages with custom configuration.
    pub fn with_config(
        object_store: Arc<dyn ObjectStore>,
        provider: Arc<dyn EnrichmentProvider>,
        index: Arc<dyn SearchIndex>,
        config: StageConfig,
    ) -> Self {
        Self {
            fingerprinter: ContentFingerprinter::new(object_store.clone()),
            replication: ReplicationStage::with_config(object_store.clone(), config.replication),
            enrichment: EnrichmentStage::with_config(
                object_store.clone(),
                provider,
                config.enrichment,
            ),
            metadata_commit: MetadataCommitStage::with_config(
                object_store,
                config.metadata_commit,
            ),
            indexing: IndexingStage::with_config(index, config.indexing),
        }
    }

    pub fn fingerprinter(&self) -> &ContentFingerprinter {
        &self.fingerprinter
    }

    pub fn indexing(&self) -> &IndexingStage {
        &self.indexing
    }

    /// Run one attempt of `stage` against `record`.
    pub async fn execute(
        &self,
        stage: Stage,
        record: &PipelineRecord,
    ) -> Result<StageEffect, StageError> {
        match stage {
            Stage::Replication => self
                .replication
                .execute(record)
                .await
                .map(StageEffect::Replicated),
            Stage::Enrichment => self
                .enrichment
                .execute(record)
                .await
                .map(StageEffect::Enriched),
            Stage::MetadataCommit => self
                .metadata_commit
                .execute(record)
                .await
                .map(|etag| StageEffect::MetadataCommitted { etag }),
            Stage::Indexing => self
                .indexing
                .execute(record)
                .await
                .map(|()| StageEffect::Indexed),
        }
    }

    /// Output to continue with once `stage` exhausted its retries, if the
    /// stage's failure policy allows continuing.
    pub fn degraded_fallback(&self, stage: Stage, error: &StageError) -> Option<StageEffect> {
        match stage {
            Stage::Enrichment => self.enrichment.degraded_fallback(error).map(StageEffect::Enriched),
            _ => None,
        }
    }
}

/// Classify an object store error raised while reading or copying the source.
pub(crate) fn source_error(error: ObjectStoreError) -> StageError {
    let kind = match &error {
        ObjectStoreError::NotFound { .. } => ErrorKind::SourceNotFound,
        ObjectStoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        ObjectStoreError::PreconditionFailed { .. } | ObjectStoreError::Integrity(_) => {
            ErrorKind::CopyIntegrityMismatch
        }
        ObjectStoreError::Transient(_) => ErrorKind::TransientIo,
    };
    StageError::new(kind, error.to_string())
}

/// Classify an object store error raised against the replica.
pub(crate) fn replica_error(error: ObjectStoreError) -> StageError {
    let kind = match &error {
        ObjectStoreError::NotFound { .. } => ErrorKind::ReplicaMissing,
        ObjectStoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        ObjectStoreError::PreconditionFailed { .. } => ErrorKind::ConcurrentModification,
        ObjectStoreError::Integrity(_) | ObjectStoreError::Transient(_) => ErrorKind::TransientIo,
    };
    StageError::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_classification() {
        let cases = [
            (ObjectStoreError::not_found("raw", "a"), ErrorKind::SourceNotFound),
            (
                ObjectStoreError::permission_denied("nope"),
                ErrorKind::PermissionDenied,
            ),
            (
                ObjectStoreError::precondition_failed("a", "b"),
                ErrorKind::CopyIntegrityMismatch,
            ),
            (ObjectStoreError::transient("reset"), ErrorKind::TransientIo),
        ];
        for (error, kind) in cases {
            assert_eq!(source_error(error).kind, kind);
        }
    }

    #[test]
    fn test_replica_error_classification() {
        assert_eq!(
            replica_error(ObjectStoreError::not_found("processed", "a")).kind,
            ErrorKind::ReplicaMissing
        );
        assert_eq!(
            replica_error(ObjectStoreError::transient("reset")).kind,
            ErrorKind::TransientIo
        );
    }
}

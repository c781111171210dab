//! Metadata commit stage: merge enrichment into the replica's metadata.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::errors::StageError;
use crate::stages::replica_error;
use object_indexer_repository::{ObjectStore, ObjectStoreError};
use object_indexer_shared::{ErrorKind, PipelineRecord, DEFAULT_METADATA_PREFIX};

/// Configuration for the metadata commit stage.
#[derive(Debug, Clone)]
pub struct MetadataCommitConfig {
    /// Reserved namespace for enrichment keys on the object.
    pub metadata_prefix: String,
    /// Refetch-and-merge rounds after the first conditional write loses.
    pub max_conflict_retries: u32,
}

impl Default for MetadataCommitConfig {
    fn default() -> Self {
        Self {
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            max_conflict_retries: 3,
        }
    }
}

/// Writes enrichment onto the replica with an etag-guarded metadata update.
pub struct MetadataCommitStage {
    store: Arc<dyn ObjectStore>,
    config: MetadataCommitConfig,
}

impl MetadataCommitStage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(store, MetadataCommitConfig::default())
    }

    pub fn with_config(store: Arc<dyn ObjectStore>, config: MetadataCommitConfig) -> Self {
        Self { store, config }
    }

    /// Merge and commit, returning the replica's new etag.
    ///
    /// Each round re-reads the replica, merges against what is there now and
    /// writes conditionally on the etag it just read. Losing every round is
    /// reported as `ConcurrentModification`; the replica then holds whatever
    /// the competing writer last put there.
    #[instrument(skip(self, record), fields(object_key = %record.key.object_key, run_id = %record.run_id))]
    pub async fn execute(&self, record: &PipelineRecord) -> Result<String, StageError> {
        let (replica, enrichment) = match (&record.replica, &record.enrichment) {
            (Some(replica), Some(enrichment)) => (replica, enrichment),
            _ => {
                return Err(StageError::invalid_state(
                    "Metadata commit requires a replica and enrichment",
                ))
            }
        };

        let prefix = &self.config.metadata_prefix;
        for round in 0..=self.config.max_conflict_retries {
            let current = self
                .store
                .head(&replica.bucket, &replica.key)
                .await
                .map_err(replica_error)?;

            let merged = enrichment.merge_into(&current.metadata, prefix);
            if merged == current.metadata {
                debug!("Metadata already up to date");
                return Ok(current.etag);
            }

            match self
                .store
                .put_metadata(&replica.bucket, &replica.key, &merged, &current.etag)
                .await
            {
                Ok(etag) => {
                    info!(round, fields = merged.len(), "Committed metadata");
                    return Ok(etag);
                }
                Err(ObjectStoreError::PreconditionFailed { expected, actual }) => {
                    warn!(
                        round,
                        expected = %expected,
                        actual = %actual,
                        "Replica changed during metadata commit, refetching"
                    );
                }
                Err(e) => return Err(replica_error(e)),
            }
        }

        Err(StageError::new(
            ErrorKind::ConcurrentModification,
            format!(
                "Replica metadata kept changing across {} commit attempts",
                self.config.max_conflict_retries + 1
            ),
        ))
    }
}

//! Replication stage: copy the source object into the target bucket.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::errors::StageError;
use crate::stages::{source_error, ContentFingerprinter};
use object_indexer_repository::{ObjectStore, PutObjectRequest};
use object_indexer_shared::{ErrorKind, ObjectSnapshot, PipelineRecord};

/// Configuration for the replication stage.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Re-read the replica and compare its fingerprint, not just its size.
    pub verify_content: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            verify_content: true,
        }
    }
}

/// Copies bytes and existing metadata from source to target.
///
/// A server-side copy is preferred when the store supports it; otherwise the
/// object is streamed through. Either way the replica is verified against the
/// source snapshot before the stage reports success.
pub struct ReplicationStage {
    store: Arc<dyn ObjectStore>,
    verifier: ContentFingerprinter,
    config: ReplicationConfig,
}

impl ReplicationStage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(store, ReplicationConfig::default())
    }

    pub fn with_config(store: Arc<dyn ObjectStore>, config: ReplicationConfig) -> Self {
        Self {
            verifier: ContentFingerprinter::new(store.clone()),
            store,
            config,
        }
    }

    #[instrument(skip(self, record), fields(object_key = %record.key.object_key, run_id = %record.run_id))]
    pub async fn execute(&self, record: &PipelineRecord) -> Result<ObjectSnapshot, StageError> {
        let item = &record.work_item;
        let source = &record.source;

        let replica = if self.store.supports_server_side_copy() {
            debug!("Server-side copy");
            self.store
                .copy(
                    item.source_bucket(),
                    item.object_key(),
                    item.target_bucket(),
                    item.object_key(),
                    Some(&source.etag),
                )
                .await
                .map_err(source_error)?
        } else {
            self.streamed_copy(record).await?
        };

        if replica.size != source.size {
            return Err(StageError::new(
                ErrorKind::CopyIntegrityMismatch,
                format!(
                    "Replica size {} does not match source size {}",
                    replica.size, source.size
                ),
            ));
        }

        if self.config.verify_content {
            let (_, fingerprint) = self
                .verifier
                .fingerprint(item.target_bucket(), item.object_key())
                .await
                .map_err(|e| StageError::new(ErrorKind::CopyIntegrityMismatch, e.message))?;
            if fingerprint != record.key.fingerprint {
                return Err(StageError::new(
                    ErrorKind::CopyIntegrityMismatch,
                    format!(
                        "Replica fingerprint {} does not match source {}",
                        fingerprint.short(),
                        record.key.fingerprint.short()
                    ),
                ));
            }
        }

        info!(
            target_bucket = item.target_bucket(),
            size = replica.size,
            "Replicated object"
        );
        Ok(replica)
    }

    async fn streamed_copy(&self, record: &PipelineRecord) -> Result<ObjectSnapshot, StageError> {
        let item = &record.work_item;
        debug!("Streamed copy");

        let body = self
            .store
            .get(item.source_bucket(), item.object_key())
            .await
            .map_err(source_error)?;

        if body.snapshot.etag != record.source.etag {
            return Err(StageError::new(
                ErrorKind::CopyIntegrityMismatch,
                format!(
                    "Source changed since fingerprinting: etag {} is now {}",
                    record.source.etag, body.snapshot.etag
                ),
            ));
        }

        let request = PutObjectRequest {
            bucket: item.target_bucket().to_string(),
            key: item.object_key().to_string(),
            content_type: body.snapshot.content_type.clone(),
            metadata: body.snapshot.metadata.clone(),
        };
        self.store
            .put(request, body.stream)
            .await
            .map_err(source_error)
    }
}

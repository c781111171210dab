//! Content fingerprinting of the source object.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, instrument};

use crate::errors::StageError;
use crate::stages::source_error;
use object_indexer_repository::ObjectStore;
use object_indexer_shared::{ContentFingerprint, ErrorKind, FingerprintBuilder, ObjectSnapshot};

/// Streams an object once to compute its content fingerprint.
pub struct ContentFingerprinter {
    store: Arc<dyn ObjectStore>,
}

impl ContentFingerprinter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Fingerprint an object and return the snapshot it was taken from.
    #[instrument(skip(self))]
    pub async fn fingerprint(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(ObjectSnapshot, ContentFingerprint), StageError> {
        let mut body = self.store.get(bucket, key).await.map_err(source_error)?;

        let mut builder = FingerprintBuilder::new();
        while let Some(chunk) = body.stream.next().await {
            builder.update(&chunk.map_err(source_error)?);
        }

        if builder.bytes_seen() != body.snapshot.size {
            return Err(StageError::new(
                ErrorKind::TransientIo,
                format!(
                    "Short read of {bucket}/{key}: {} of {} bytes",
                    builder.bytes_seen(),
                    body.snapshot.size
                ),
            ));
        }

        let fingerprint = builder.finish();
        debug!(fingerprint = %fingerprint.short(), size = body.snapshot.size, "Fingerprinted object");
        Ok((body.snapshot, fingerprint))
    }

    /// Whether `snapshot` still describes the live object.
    ///
    /// A failed lookup counts as current so the stage that reads the object
    /// next classifies the error.
    #[instrument(skip(self, snapshot), fields(bucket = %snapshot.bucket, key = %snapshot.key))]
    pub async fn is_current(&self, snapshot: &ObjectSnapshot) -> bool {
        match self.store.head(&snapshot.bucket, &snapshot.key).await {
            Ok(live) => live.etag == snapshot.etag,
            Err(e) => {
                debug!(error = %e, "Could not re-check source");
                true
            }
        }
    }
}

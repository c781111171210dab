//! Enrichment stage: derive metadata from a bounded sample of the content.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tracing::{debug, instrument};

use crate::errors::StageError;
use crate::stages::replica_error;
use object_indexer_repository::{ContentSample, EnrichmentError, EnrichmentProvider, ObjectStore};
use object_indexer_shared::{
    EnrichedMetadata, ErrorKind, ObjectSnapshot, PipelineRecord, DEFAULT_METADATA_PREFIX,
};

/// What to do once enrichment has exhausted its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnrichmentFailurePolicy {
    /// The pipeline ends in `Failed(Enrichment)`.
    #[default]
    FailPipeline,
    /// Continue with metadata flagged `degraded=true`.
    Degrade,
}

/// Configuration for the enrichment stage.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Largest prefix of the object handed to the provider.
    pub sample_bytes: usize,
    /// Deadline for a single provider call.
    pub timeout: Duration,
    pub on_failure: EnrichmentFailurePolicy,
    /// Reserved namespace stripped from provider keys.
    pub metadata_prefix: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            sample_bytes: 1024 * 1024,
            timeout: Duration::from_secs(30),
            on_failure: EnrichmentFailurePolicy::FailPipeline,
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
        }
    }
}

/// Reads a deterministic prefix of the replica and asks the provider for
/// metadata.
///
/// Reading the replica rather than the source keeps enrichment consistent
/// with the bytes that were verified during replication.
pub struct EnrichmentStage {
    store: Arc<dyn ObjectStore>,
    provider: Arc<dyn EnrichmentProvider>,
    config: EnrichmentConfig,
}

impl EnrichmentStage {
    pub fn new(store: Arc<dyn ObjectStore>, provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self::with_config(store, provider, EnrichmentConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        provider: Arc<dyn EnrichmentProvider>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    #[instrument(skip(self, record), fields(object_key = %record.key.object_key, run_id = %record.run_id))]
    pub async fn execute(&self, record: &PipelineRecord) -> Result<EnrichedMetadata, StageError> {
        let replica = record
            .replica
            .as_ref()
            .ok_or_else(|| StageError::invalid_state("Enrichment requires a replica"))?;

        let sample = self.read_sample(replica).await?;
        debug!(
            sample_bytes = sample.bytes.len(),
            truncated = sample.truncated,
            "Calling enrichment provider"
        );

        let output = match tokio::time::timeout(self.config.timeout, self.provider.enrich(&sample))
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(EnrichmentError::Timeout(ms))) => {
                return Err(StageError::new(
                    ErrorKind::EnrichmentTimeout,
                    format!("Provider timed out after {ms} ms"),
                ))
            }
            Ok(Err(e)) => return Err(StageError::new(ErrorKind::EnrichmentProviderError, e.to_string())),
            Err(_) => {
                return Err(StageError::new(
                    ErrorKind::EnrichmentTimeout,
                    format!(
                        "No provider response within {} ms",
                        self.config.timeout.as_millis()
                    ),
                ))
            }
        };

        Ok(EnrichedMetadata::from_provider(
            output,
            &self.config.metadata_prefix,
        ))
    }

    /// Placeholder metadata once retries are exhausted, when the policy
    /// allows continuing. Only provider failures qualify.
    pub fn degraded_fallback(&self, error: &StageError) -> Option<EnrichedMetadata> {
        let provider_failure = matches!(
            error.kind,
            ErrorKind::EnrichmentProviderError | ErrorKind::EnrichmentTimeout
        );
        (provider_failure && self.config.on_failure == EnrichmentFailurePolicy::Degrade)
            .then(EnrichedMetadata::degraded)
    }

    async fn read_sample(&self, replica: &ObjectSnapshot) -> Result<ContentSample, StageError> {
        let mut body = self
            .store
            .get(&replica.bucket, &replica.key)
            .await
            .map_err(replica_error)?;

        let cap = self.config.sample_bytes;
        let mut buffer = BytesMut::with_capacity(cap.min(body.snapshot.size as usize));
        while buffer.len() < cap {
            match body.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(replica_error)?;
                    let take = chunk.len().min(cap - buffer.len());
                    buffer.extend_from_slice(&chunk[..take]);
                }
                None => break,
            }
        }
        // Dropping the stream here releases the rest of the object unread.
        drop(body.stream);

        let total_size = body.snapshot.size;
        Ok(ContentSample {
            key: replica.key.clone(),
            truncated: (buffer.len() as u64) < total_size,
            bytes: buffer.freeze(),
            total_size,
            content_type: body.snapshot.content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use object_indexer_repository::memory::{InMemoryObjectStore, StaticEnrichmentProvider};
    use object_indexer_repository::ProviderOutput;
    use object_indexer_shared::{ContentFingerprint, WorkItem};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records the samples it receives.
    struct RecordingProvider {
        samples: Mutex<Vec<ContentSample>>,
    }

    #[async_trait]
    impl EnrichmentProvider for RecordingProvider {
        async fn enrich(&self, sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
            self.samples.lock().unwrap().push(sample.clone());
            Ok(ProviderOutput::new())
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EnrichmentProvider for SlowProvider {
        async fn enrich(&self, _sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ProviderOutput::new())
        }
    }

    fn replicated(store: &InMemoryObjectStore, content: &'static [u8]) -> PipelineRecord {
        let source = store.insert_object("raw", "doc.txt", content, None, BTreeMap::new());
        let replica = store.insert_object("processed", "doc.txt", content, None, BTreeMap::new());
        let item = WorkItem::new("evt", "raw", "processed", "doc.txt");
        let mut record = PipelineRecord::new(item, ContentFingerprint::of(content), source);
        record.replica = Some(replica);
        record
    }

    #[tokio::test]
    async fn test_normalizes_provider_output() {
        let store = Arc::new(InMemoryObjectStore::new());
        let record = replicated(&store, b"hello");
        let provider = Arc::new(StaticEnrichmentProvider::default().with_field("Category", "photo"));

        let metadata = EnrichmentStage::new(store, provider)
            .execute(&record)
            .await
            .unwrap();
        assert_eq!(metadata.get("category"), Some("photo"));
    }

    #[tokio::test]
    async fn test_large_objects_are_sampled() {
        let store = Arc::new(InMemoryObjectStore::new().with_chunk_size(3));
        let record = replicated(&store, b"0123456789");
        let provider = Arc::new(RecordingProvider {
            samples: Mutex::new(Vec::new()),
        });
        let config = EnrichmentConfig {
            sample_bytes: 4,
            ..EnrichmentConfig::default()
        };

        EnrichmentStage::with_config(store, provider.clone(), config)
            .execute(&record)
            .await
            .unwrap();

        let samples = provider.samples.lock().unwrap();
        assert_eq!(samples[0].bytes.as_ref(), b"0123");
        assert!(samples[0].truncated);
        assert_eq!(samples[0].total_size, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let store = Arc::new(InMemoryObjectStore::new());
        let record = replicated(&store, b"hello");
        let config = EnrichmentConfig {
            timeout: Duration::from_secs(1),
            ..EnrichmentConfig::default()
        };

        let error = EnrichmentStage::with_config(store, Arc::new(SlowProvider), config)
            .execute(&record)
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::EnrichmentTimeout);
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_replica_input() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut record = replicated(&store, b"hello");
        record.replica = None;

        let error = EnrichmentStage::new(store, Arc::new(StaticEnrichmentProvider::default()))
            .execute(&record)
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidState);
    }

    #[test]
    fn test_degraded_fallback_follows_policy() {
        let store = Arc::new(InMemoryObjectStore::new());
        let provider = Arc::new(StaticEnrichmentProvider::default());
        let timeout = StageError::new(ErrorKind::EnrichmentTimeout, "slow");

        let failing = EnrichmentStage::new(store.clone(), provider.clone());
        assert!(failing.degraded_fallback(&timeout).is_none());

        let degrading = EnrichmentStage::with_config(
            store,
            provider,
            EnrichmentConfig {
                on_failure: EnrichmentFailurePolicy::Degrade,
                ..EnrichmentConfig::default()
            },
        );
        let fallback = degrading.degraded_fallback(&timeout).unwrap();
        assert!(fallback.is_degraded());

        let missing = StageError::new(ErrorKind::ReplicaMissing, "gone");
        assert!(degrading.degraded_fallback(&missing).is_none());
    }
}

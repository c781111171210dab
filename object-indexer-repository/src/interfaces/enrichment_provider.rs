//! Enrichment provider trait definition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::EnrichmentError;

/// Raw provider output, normalized by the enrichment stage.
pub type ProviderOutput = BTreeMap<String, serde_json::Value>;

/// Bounded content handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSample {
    pub key: String,
    /// Deterministic prefix of the object content.
    pub bytes: Bytes,
    /// Size of the whole object.
    pub total_size: u64,
    /// Whether `bytes` is shorter than the object.
    pub truncated: bool,
    pub content_type: Option<String>,
}

/// Derives metadata from object content.
///
/// Implementations are expected to be deterministic for identical input, to
/// answer within bounded latency, and to have no side effects on the source.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError>;
}

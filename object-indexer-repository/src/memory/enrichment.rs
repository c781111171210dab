//! In-process enrichment providers.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::EnrichmentError;
use crate::interfaces::{ContentSample, EnrichmentProvider, ProviderOutput};

/// Returns the same output for every sample.
#[derive(Debug, Clone, Default)]
pub struct StaticEnrichmentProvider {
    output: ProviderOutput,
}

impl StaticEnrichmentProvider {
    pub fn new(output: ProviderOutput) -> Self {
        Self { output }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl EnrichmentProvider for StaticEnrichmentProvider {
    async fn enrich(&self, _sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
        Ok(self.output.clone())
    }
}

/// Classifies content by its leading magic bytes.
///
/// Deterministic and offline, which makes it the default provider for local
/// runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffingEnrichmentProvider;

impl SniffingEnrichmentProvider {
    pub fn new() -> Self {
        Self
    }

    fn sniff(bytes: &[u8]) -> (&'static str, &'static str) {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            ("image", "image/png")
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ("image", "image/jpeg")
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            ("image", "image/gif")
        } else if bytes.starts_with(b"%PDF-") {
            ("document", "application/pdf")
        } else if std::str::from_utf8(bytes).is_ok() {
            ("text", "text/plain")
        } else {
            ("binary", "application/octet-stream")
        }
    }
}

#[async_trait]
impl EnrichmentProvider for SniffingEnrichmentProvider {
    async fn enrich(&self, sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
        let (category, media_type) = Self::sniff(&sample.bytes);

        let mut output = ProviderOutput::new();
        output.insert("category".to_string(), Value::from(category));
        output.insert("media-type".to_string(), Value::from(media_type));
        output.insert("sampled-bytes".to_string(), Value::from(sample.bytes.len() as u64));
        if category == "text" {
            let text = String::from_utf8_lossy(&sample.bytes);
            output.insert(
                "word-count".to_string(),
                Value::from(text.split_whitespace().count() as u64),
            );
        }
        Ok(output)
    }
}

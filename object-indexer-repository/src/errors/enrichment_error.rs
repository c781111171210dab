//! Enrichment provider error types.

use thiserror::Error;

/// Errors reported by an enrichment provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentError {
    /// The provider failed to produce metadata.
    #[error("Enrichment provider error: {0}")]
    Provider(String),

    /// The provider did not answer in time.
    #[error("Enrichment timed out after {0} ms")]
    Timeout(u64),
}

impl EnrichmentError {
    /// Create a provider error.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }
}

//! Search index trait definition.

use async_trait::async_trait;

use crate::errors::SearchIndexError;
use object_indexer_shared::IndexDocument;

/// Abstract interface for the search/vector index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document stored under `key`.
    ///
    /// Must be idempotent by key: repeating the call with the same document
    /// leaves the index unchanged.
    async fn upsert(&self, key: &str, document: &IndexDocument) -> Result<(), SearchIndexError>;

    /// Ensure the index exists with proper mappings.
    ///
    /// Called once during startup.
    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError> {
        Ok(())
    }

    /// Check if the index is healthy and reachable.
    async fn health_check(&self) -> Result<bool, SearchIndexError>;
}

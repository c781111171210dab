//! Indexing stage: upsert the object's document into the search index.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::errors::{PipelineError, StageError};
use object_indexer_repository::{SearchIndex, SearchIndexError};
use object_indexer_shared::{ErrorKind, IndexDocument, PipelineRecord};

/// Default index class for object documents.
pub const DEFAULT_INDEX_CLASS: &str = "ObjectDocument";

/// Configuration for the indexing stage.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Class (collection) the documents are written into.
    pub class_name: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            class_name: DEFAULT_INDEX_CLASS.to_string(),
        }
    }
}

/// Upserts one document per object key.
pub struct IndexingStage {
    index: Arc<dyn SearchIndex>,
    config: IndexingConfig,
}

impl IndexingStage {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self::with_config(index, IndexingConfig::default())
    }

    pub fn with_config(index: Arc<dyn SearchIndex>, config: IndexingConfig) -> Self {
        Self { index, config }
    }

    #[instrument(skip(self, record), fields(object_key = %record.key.object_key, run_id = %record.run_id))]
    pub async fn execute(&self, record: &PipelineRecord) -> Result<(), StageError> {
        let document = IndexDocument::from_record(record, &self.config.class_name).ok_or_else(
            || StageError::invalid_state("Indexing requires a replica and enrichment"),
        )?;

        self.index
            .upsert(&record.key.object_key, &document)
            .await
            .map_err(|e| {
                let kind = match e {
                    SearchIndexError::Unavailable(_) => ErrorKind::IndexUnavailable,
                    SearchIndexError::Rejected(_) | SearchIndexError::Serialization(_) => {
                        ErrorKind::IndexRejected
                    }
                };
                StageError::new(kind, e.to_string())
            })?;

        info!(class_name = %self.config.class_name, "Indexed document");
        Ok(())
    }

    /// Ensure the search index exists and is reachable.
    pub async fn ensure_index(&self) -> Result<(), PipelineError> {
        self.index.ensure_index_exists().await?;
        if !self.index.health_check().await? {
            return Err(PipelineError::SearchIndexError(SearchIndexError::unavailable(
                "Search index reported unhealthy",
            )));
        }
        Ok(())
    }
}

//! In-memory search index.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndex;
use object_indexer_shared::IndexDocument;

/// Search index holding documents by object key.
#[derive(Default)]
pub struct InMemorySearchIndex {
    documents: DashMap<String, IndexDocument>,
    upserts: AtomicUsize,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, key: &str) -> Option<IndexDocument> {
        self.documents.get(key).map(|d| d.value().clone())
    }

    /// Total number of upsert calls received, including repeats.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn upsert(&self, key: &str, document: &IndexDocument) -> Result<(), SearchIndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        debug!(key, class_name = %document.class_name, "Upserting document");
        self.documents.insert(key.to_string(), document.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, SearchIndexError> {
        Ok(true)
    }
}

//! In-memory pipeline record store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::RecordStoreError;
use crate::interfaces::PipelineRecordStore;
use object_indexer_shared::{PipelineRecord, PipelineState, RecordKey};

/// Record store with per-entry compare-and-swap on `version`.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<RecordKey, PipelineRecord>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PipelineRecordStore for InMemoryRecordStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<PipelineRecord>, RecordStoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn insert(&self, mut record: PipelineRecord) -> Result<PipelineRecord, RecordStoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(RecordStoreError::AlreadyExists(record.key)),
            Entry::Vacant(slot) => {
                record.version = 1;
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(&self, record: &PipelineRecord) -> Result<PipelineRecord, RecordStoreError> {
        let mut stored = self
            .records
            .get_mut(&record.key)
            .ok_or_else(|| RecordStoreError::NotFound(record.key.clone()))?;

        if stored.version != record.version {
            return Err(RecordStoreError::VersionConflict {
                key: record.key.clone(),
                expected: record.version,
                found: stored.version,
            });
        }

        let mut next = record.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn find_by_object_key(
        &self,
        object_key: &str,
    ) -> Result<Vec<PipelineRecord>, RecordStoreError> {
        let mut records: Vec<PipelineRecord> = self
            .records
            .iter()
            .filter(|r| r.key().object_key == object_key)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_by_state(
        &self,
        state: PipelineState,
    ) -> Result<Vec<PipelineRecord>, RecordStoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize, RecordStoreError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| RecordStoreError::storage(format!("Invalid retention: {}", e)))?;
        let cutoff = now - retention;

        let mut purged = 0;
        self.records.retain(|_, record| {
            let expired = record.expired_before(cutoff);
            if expired {
                purged += 1;
            }
            !expired
        });
        Ok(purged)
    }
}

//! Pipeline record store trait definition.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RecordStoreError;
use object_indexer_shared::{PipelineRecord, PipelineState, RecordKey};

/// Durable store of pipeline progress keyed by `(object key, fingerprint)`.
///
/// Writes are conditional on the record `version`, so two workers can never
/// both believe they own the same run: the loser of a race gets
/// `VersionConflict` or `AlreadyExists` and must back off.
#[async_trait]
pub trait PipelineRecordStore: Send + Sync {
    /// Look up a record.
    async fn get(&self, key: &RecordKey) -> Result<Option<PipelineRecord>, RecordStoreError>;

    /// Insert a record that must not exist yet.
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineRecord)` - The stored record with its assigned version
    /// * `Err(RecordStoreError::AlreadyExists)` - If another writer inserted first
    async fn insert(&self, record: PipelineRecord) -> Result<PipelineRecord, RecordStoreError>;

    /// Replace a record if its stored version still equals `record.version`.
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineRecord)` - The stored record with the bumped version
    /// * `Err(RecordStoreError::VersionConflict)` - If the record moved on
    /// * `Err(RecordStoreError::NotFound)` - If the record was never inserted
    async fn update(&self, record: &PipelineRecord) -> Result<PipelineRecord, RecordStoreError>;

    /// All records for an object key, any fingerprint.
    async fn find_by_object_key(
        &self,
        object_key: &str,
    ) -> Result<Vec<PipelineRecord>, RecordStoreError>;

    /// All records currently in `state`.
    async fn find_by_state(
        &self,
        state: PipelineState,
    ) -> Result<Vec<PipelineRecord>, RecordStoreError>;

    /// Remove records that became terminal more than `retention` before `now`.
    ///
    /// Returns the number of records removed.
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize, RecordStoreError>;
}

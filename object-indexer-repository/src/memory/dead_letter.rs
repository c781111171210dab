//! In-memory dead-letter sink.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::DeadLetterError;
use crate::interfaces::DeadLetterSink;
use object_indexer_shared::DeadLetterRecord;

/// Keeps published dead-letter records in memory.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        warn!(
            object_key = record.work_item.object_key(),
            stage = %record.failed_stage,
            error_kind = %record.error_kind,
            attempts = record.attempts,
            "Dead-lettered work item"
        );
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

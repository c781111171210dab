//! Dead-letter sink trait definition.

use async_trait::async_trait;

use crate::errors::DeadLetterError;
use object_indexer_shared::DeadLetterRecord;

/// Receives terminal failure records for remediation.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;
}

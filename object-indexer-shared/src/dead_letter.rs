//! Terminal failure records handed to the dead-letter sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::ContentFingerprint;
use crate::record::PipelineRecord;
use crate::stage::{ErrorKind, Stage, StageOutcome};
use crate::work_item::WorkItem;

/// A pipeline run that reached `Failed(stage)`.
///
/// Preserved for remediation; the pipeline never requeues these on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub work_item: WorkItem,
    /// Absent when the source could not be read to fingerprint it.
    pub fingerprint: Option<ContentFingerprint>,
    pub failed_stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    /// Attempts made on the failed stage.
    pub attempts: u32,
    pub outcomes: Vec<StageOutcome>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Build from a record that has already transitioned to `Failed(stage)`.
    pub fn from_record(
        record: &PipelineRecord,
        stage: Stage,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: Some(record.run_id),
            work_item: record.work_item.clone(),
            fingerprint: Some(record.key.fingerprint.clone()),
            failed_stage: stage,
            error_kind: kind,
            message: message.into(),
            attempts: record.failed_attempts(stage),
            outcomes: record.outcomes.clone(),
            created_at: Utc::now(),
        }
    }

    /// Build for a work item that failed before a record existed.
    pub fn without_record(
        work_item: WorkItem,
        stage: Stage,
        kind: ErrorKind,
        message: impl Into<String>,
        outcomes: Vec<StageOutcome>,
    ) -> Self {
        let attempts = outcomes.iter().filter(|o| o.stage == stage).count() as u32;
        Self {
            id: Uuid::new_v4(),
            run_id: None,
            work_item,
            fingerprint: None,
            failed_stage: stage,
            error_kind: kind,
            message: message.into(),
            attempts,
            outcomes,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PipelineState;
    use crate::snapshot::ObjectSnapshot;

    #[test]
    fn test_from_record_counts_attempts() {
        let item = WorkItem::new("evt", "raw", "processed", "doc.txt");
        let source = ObjectSnapshot::new("raw", "doc.txt", "e", 1);
        let mut record = PipelineRecord::new(item, ContentFingerprint::of(b"x"), source);
        record.push_outcome(StageOutcome::success(Stage::Replication, 0));
        for retry in 0..3 {
            record.push_outcome(StageOutcome::failed(
                Stage::Enrichment,
                ErrorKind::EnrichmentTimeout,
                "timed out",
                retry,
            ));
        }
        record.transition(PipelineState::Failed(Stage::Enrichment));

        let dead = DeadLetterRecord::from_record(
            &record,
            Stage::Enrichment,
            ErrorKind::EnrichmentTimeout,
            "timed out",
        );

        assert_eq!(dead.attempts, 3);
        assert_eq!(dead.outcomes.len(), 4);
        assert_eq!(dead.run_id, Some(record.run_id));
        assert_eq!(dead.fingerprint, Some(record.key.fingerprint.clone()));
    }

    #[test]
    fn test_serializes() {
        let item = WorkItem::new("evt", "raw", "processed", "doc.txt");
        let dead = DeadLetterRecord::without_record(
            item,
            Stage::Replication,
            ErrorKind::SourceNotFound,
            "gone",
            vec![StageOutcome::failed(
                Stage::Replication,
                ErrorKind::SourceNotFound,
                "gone",
                0,
            )],
        );
        let json = serde_json::to_value(&dead).unwrap();
        assert_eq!(json["failed_stage"], "Replication");
        assert_eq!(json["error_kind"], "SourceNotFound");
        assert_eq!(dead.attempts, 1);
    }
}

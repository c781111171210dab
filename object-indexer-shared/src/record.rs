//! Durable pipeline record and the run state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::ContentFingerprint;
use crate::metadata::EnrichedMetadata;
use crate::snapshot::ObjectSnapshot;
use crate::stage::{Stage, StageOutcome, StageStatus};
use crate::work_item::WorkItem;

/// Overall state of a pipeline run.
///
/// `Completed`, `Failed` and `Superseded` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Received,
    Replicating,
    Enriching,
    CommittingMetadata,
    Indexing,
    Completed,
    Failed(Stage),
    Superseded,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed(_) | PipelineState::Superseded
        )
    }

    /// The in-progress state in which `stage` executes.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Replication => PipelineState::Replicating,
            Stage::Enrichment => PipelineState::Enriching,
            Stage::MetadataCommit => PipelineState::CommittingMetadata,
            Stage::Indexing => PipelineState::Indexing,
        }
    }

    /// The stage that has to run next from this state.
    pub fn pending_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Received | PipelineState::Replicating => Some(Stage::Replication),
            PipelineState::Enriching => Some(Stage::Enrichment),
            PipelineState::CommittingMetadata => Some(Stage::MetadataCommit),
            PipelineState::Indexing => Some(Stage::Indexing),
            _ => None,
        }
    }

    /// State after the current stage reports success.
    ///
    /// `Received` advances into `Replicating`, the state replication runs in.
    pub fn advance(&self) -> PipelineState {
        if *self == PipelineState::Received {
            return PipelineState::Replicating;
        }
        match self.pending_stage().and_then(Stage::next) {
            Some(next) => PipelineState::for_stage(next),
            None if self.is_terminal() => *self,
            None => PipelineState::Completed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => f.write_str("Received"),
            PipelineState::Replicating => f.write_str("Replicating"),
            PipelineState::Enriching => f.write_str("Enriching"),
            PipelineState::CommittingMetadata => f.write_str("CommittingMetadata"),
            PipelineState::Indexing => f.write_str("Indexing"),
            PipelineState::Completed => f.write_str("Completed"),
            PipelineState::Failed(stage) => write!(f, "Failed({stage})"),
            PipelineState::Superseded => f.write_str("Superseded"),
        }
    }
}

/// Identity of a pipeline record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub object_key: String,
    pub fingerprint: ContentFingerprint,
}

impl RecordKey {
    pub fn new(object_key: impl Into<String>, fingerprint: ContentFingerprint) -> Self {
        Self {
            object_key: object_key.into(),
            fingerprint,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object_key, self.fingerprint.short())
    }
}

/// Progress of the pipeline for one `(object key, fingerprint)` pair.
///
/// Created on first sighting of the pair and mutated only by the coordinator.
/// `version` backs the conditional writes of the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub key: RecordKey,
    pub run_id: Uuid,
    /// Number of runs started on this record, including the current one.
    pub runs: u32,
    pub work_item: WorkItem,
    pub state: PipelineState,
    /// Outcomes of the current run, in order.
    pub outcomes: Vec<StageOutcome>,
    /// Source object as it was when the fingerprint was taken.
    pub source: ObjectSnapshot,
    pub replica: Option<ObjectSnapshot>,
    pub enrichment: Option<EnrichedMetadata>,
    pub committed_etag: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

impl PipelineRecord {
    pub fn new(work_item: WorkItem, fingerprint: ContentFingerprint, source: ObjectSnapshot) -> Self {
        let now = Utc::now();
        Self {
            key: RecordKey::new(work_item.object_key(), fingerprint),
            run_id: Uuid::new_v4(),
            runs: 1,
            work_item,
            state: PipelineState::Received,
            outcomes: Vec::new(),
            source,
            replica: None,
            enrichment: None,
            committed_etag: None,
            version: 0,
            created_at: now,
            updated_at: now,
            terminal_at: None,
        }
    }

    /// Start a fresh run on an existing record.
    ///
    /// Stage outputs and the outcome history of the previous run are dropped;
    /// the record keeps its identity and version.
    pub fn restart(&mut self, work_item: WorkItem, source: ObjectSnapshot) {
        self.run_id = Uuid::new_v4();
        self.runs += 1;
        self.work_item = work_item;
        self.state = PipelineState::Received;
        self.outcomes.clear();
        self.source = source;
        self.replica = None;
        self.enrichment = None;
        self.committed_etag = None;
        self.updated_at = Utc::now();
        self.terminal_at = None;
    }

    /// Start a fresh run that re-enters the pipeline at `stage`.
    ///
    /// Outputs of earlier stages stay in place. Outcomes recorded for `stage`
    /// and everything after it are dropped so the new run starts with a full
    /// retry budget.
    pub fn resume(&mut self, stage: Stage) {
        let rank = |s: Stage| Stage::ALL.iter().position(|x| *x == s);
        self.run_id = Uuid::new_v4();
        self.runs += 1;
        self.outcomes.retain(|o| rank(o.stage) < rank(stage));
        self.transition(PipelineState::for_stage(stage));
    }

    pub fn transition(&mut self, next: PipelineState) {
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        self.terminal_at = next.is_terminal().then_some(now);
    }

    pub fn push_outcome(&mut self, outcome: StageOutcome) {
        self.updated_at = outcome.timestamp;
        self.outcomes.push(outcome);
    }

    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Number of failed attempts recorded for `stage` in the current run.
    pub fn failed_attempts(&self, stage: Stage) -> u32 {
        self.outcomes
            .iter()
            .filter(|o| o.stage == stage && o.status == StageStatus::Failed)
            .count() as u32
    }

    /// Whether the record reached a terminal state before `cutoff`.
    pub fn expired_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.terminal_at.is_some_and(|at| at < cutoff)
    }
}

//! Pipeline coordinator.
//!
//! Sequences the stages for each work item, persists every state change
//! through conditional writes on the record store, applies the retry policies
//! and publishes dead-letter records for runs that end in `Failed(stage)`.

mod registry;

pub use registry::{ActiveRun, RunGuard, RunRegistry};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{PipelineError, StageError};
use crate::retry::{RetryPolicy, StagePolicies};
use crate::stages::{StageEffect, StageSet};
use object_indexer_repository::{DeadLetterSink, PipelineRecordStore, RecordStoreError};
use object_indexer_shared::{
    ContentFingerprint, DeadLetterRecord, ErrorKind, ObjectSnapshot, PipelineRecord,
    PipelineState, RecordKey, Stage, StageOutcome, WorkItem,
};

/// Configuration for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Retry policy per stage. Fingerprinting the source shares the
    /// replication policy.
    pub policies: StagePolicies,
}

impl CoordinatorConfig {
    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }
}

/// How a work item or repair request was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage succeeded.
    Completed,
    /// The same content was already processed; no stage ran.
    AlreadyCompleted,
    /// A run for the same content is already in flight.
    Absorbed,
    /// The run ended in `Failed(stage)` and was dead-lettered.
    Failed {
        /// Absent when the failure happened before a record existed.
        key: Option<RecordKey>,
        stage: Stage,
        kind: ErrorKind,
    },
    /// Newer content for the key took over.
    Superseded,
    /// The source changed after this event fingerprinted it. The event that
    /// wrote the newer content owns the key, so nothing ran.
    Stale,
}

enum Attempt {
    Succeeded(StageEffect),
    Failed(StageError),
    Cancelled,
}

/// Drives pipeline records through the stage chain.
///
/// Shared by all workers behind an `Arc`; distinct object keys run fully in
/// parallel while each key has at most one active run.
pub struct Coordinator {
    stages: StageSet,
    records: Arc<dyn PipelineRecordStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    registry: RunRegistry,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a new coordinator with default retry policies.
    pub fn new(
        stages: StageSet,
        records: Arc<dyn PipelineRecordStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self::with_config(stages, records, dead_letters, CoordinatorConfig::default())
    }

    /// Create a new coordinator with custom configuration.
    pub fn with_config(
        stages: StageSet,
        records: Arc<dyn PipelineRecordStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            stages,
            records,
            dead_letters,
            registry: RunRegistry::new(),
            config,
        }
    }

    /// Process one admitted work item to completion.
    ///
    /// Returns once the item is fully handled: its run finished, it was
    /// absorbed into a run already in flight, or it short-circuited on a
    /// completed record. An item whose source was overwritten after it was
    /// fingerprinted returns `Stale` and never supersedes the newer run. Terminal failures are reported as
    /// `RunOutcome::Failed` after the dead-letter record was published; `Err`
    /// is reserved for record store and dead-letter sink failures.
    #[instrument(skip(self, item), fields(object_key = %item.object_key(), event_id = %item.event_id()))]
    pub async fn handle(&self, mut item: WorkItem) -> Result<RunOutcome, PipelineError> {
        let attempt = item.record_attempt();
        debug!(attempt, "Handling work item");

        let (source, fingerprint) = match self.fingerprint_source(&item).await {
            Ok(fingerprinted) => fingerprinted,
            Err((error, outcomes)) => return self.fail_unfingerprinted(item, error, outcomes).await,
        };

        let (record, guard) = {
            let _admission = self.registry.lock_key(item.object_key()).await;
            let key = RecordKey::new(item.object_key(), fingerprint.clone());
            let existing = self.records.get(&key).await?;

            if existing.as_ref().is_some_and(PipelineRecord::is_completed) {
                info!(fingerprint = %fingerprint.short(), "Content already processed");
                return Ok(RunOutcome::AlreadyCompleted);
            }

            if !self.stages.fingerprinter().is_current(&source).await {
                info!(
                    fingerprint = %fingerprint.short(),
                    etag = %source.etag,
                    "Source changed since fingerprinting, dropping stale event"
                );
                return Ok(RunOutcome::Stale);
            }

            if let Some(active) = self.registry.active(item.object_key()) {
                if active.fingerprint == fingerprint {
                    info!(run_id = %active.run_id, "Absorbed into in-flight run");
                    return Ok(RunOutcome::Absorbed);
                }
                info!(
                    superseded_run = %active.run_id,
                    old_fingerprint = %active.fingerprint.short(),
                    new_fingerprint = %fingerprint.short(),
                    "Superseding in-flight run"
                );
                active.supersede().await;
            }

            let record = match existing {
                None => match self
                    .records
                    .insert(PipelineRecord::new(item, fingerprint.clone(), source))
                    .await
                {
                    Ok(record) => record,
                    Err(RecordStoreError::AlreadyExists(_)) => return Ok(RunOutcome::Absorbed),
                    Err(e) => return Err(e.into()),
                },
                Some(mut record) => {
                    debug!(previous_state = %record.state, "Restarting record");
                    record.restart(item, source);
                    match self.records.update(&record).await {
                        Ok(record) => record,
                        Err(RecordStoreError::VersionConflict { .. }) => {
                            return Ok(RunOutcome::Absorbed)
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            };

            let guard = self
                .registry
                .register(&record.key.object_key, record.run_id, fingerprint);
            (record, guard)
        };

        self.drive(record, guard).await
    }

    /// Re-run only the indexing stage for a record in `Failed(Indexing)`.
    ///
    /// Replication and metadata commit are not repeated. If a newer
    /// fingerprint for the same key has been processed since, the record is
    /// marked `Superseded` instead so stale content never reaches the index.
    #[instrument(skip(self), fields(object_key = %key.object_key, fingerprint = %key.fingerprint.short()))]
    pub async fn reindex(&self, key: &RecordKey) -> Result<RunOutcome, PipelineError> {
        let (record, guard) = {
            let _admission = self.registry.lock_key(&key.object_key).await;

            if let Some(active) = self.registry.active(&key.object_key) {
                return Err(PipelineError::invalid_state(format!(
                    "Run {} is in flight for {}",
                    active.run_id, key.object_key
                )));
            }

            let mut record = self
                .records
                .get(key)
                .await?
                .ok_or_else(|| PipelineError::invalid_state(format!("No record for {key}")))?;

            if record.state != PipelineState::Failed(Stage::Indexing) {
                return Err(PipelineError::invalid_state(format!(
                    "Record {key} is {}, not Failed(indexing)",
                    record.state
                )));
            }

            let newer = self
                .records
                .find_by_object_key(&key.object_key)
                .await?
                .into_iter()
                .any(|other| other.key != *key && other.updated_at > record.updated_at);
            if newer {
                info!("Newer content exists, not reindexing");
                record.transition(PipelineState::Superseded);
                self.persist(&record).await?;
                return Ok(RunOutcome::Superseded);
            }

            record.resume(Stage::Indexing);
            let record = self.persist(&record).await?.ok_or_else(|| {
                PipelineError::invalid_state(format!("Record {key} changed during reindex"))
            })?;

            let guard = self.registry.register(
                &record.key.object_key,
                record.run_id,
                record.key.fingerprint.clone(),
            );
            (record, guard)
        };

        self.drive(record, guard).await
    }

    /// Reindex every record currently in `Failed(Indexing)`.
    pub async fn repair_failed_indexing(
        &self,
    ) -> Result<Vec<(RecordKey, RunOutcome)>, PipelineError> {
        let failed = self
            .records
            .find_by_state(PipelineState::Failed(Stage::Indexing))
            .await?;
        info!(count = failed.len(), "Repairing failed indexing");

        let mut repaired = Vec::with_capacity(failed.len());
        for record in failed {
            match self.reindex(&record.key).await {
                Ok(outcome) => repaired.push((record.key, outcome)),
                Err(e) => warn!(key = %record.key, error = %e, "Skipping reindex"),
            }
        }
        Ok(repaired)
    }

    /// Current state of the record for `(object key, fingerprint)`.
    pub async fn record(&self, key: &RecordKey) -> Result<Option<PipelineRecord>, PipelineError> {
        Ok(self.records.get(key).await?)
    }

    /// Every record for an object key, oldest first.
    pub async fn records_for_key(
        &self,
        object_key: &str,
    ) -> Result<Vec<PipelineRecord>, PipelineError> {
        Ok(self.records.find_by_object_key(object_key).await?)
    }

    /// Ensure the search index exists and is healthy.
    pub async fn ensure_index(&self) -> Result<(), PipelineError> {
        self.stages.indexing().ensure_index().await
    }

    /// Expire terminal records past `retention` and drop idle key locks.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize, PipelineError> {
        let purged = self.records.purge_expired(now, retention).await?;
        let pruned = self.registry.prune_idle_locks();
        debug!(purged, pruned, "Purged expired records");
        Ok(purged)
    }

    /// Number of runs currently executing stages.
    pub fn active_runs(&self) -> usize {
        self.registry.active_count()
    }

    async fn drive(
        &self,
        mut record: PipelineRecord,
        guard: RunGuard,
    ) -> Result<RunOutcome, PipelineError> {
        let cancel = guard.cancellation().clone();

        while let Some(stage) = record.state.pending_stage() {
            if cancel.is_cancelled() {
                return self.supersede(record).await;
            }

            let stage_state = PipelineState::for_stage(stage);
            if record.state != stage_state {
                record.transition(stage_state);
                record = match self.persist(&record).await? {
                    Some(record) => record,
                    None => return Ok(RunOutcome::Superseded),
                };
            }

            let effect = match self.execute_with_retry(stage, &mut record, &cancel).await {
                Attempt::Succeeded(effect) => effect,
                Attempt::Cancelled => return self.supersede(record).await,
                Attempt::Failed(error) => return self.fail(record, stage, error).await,
            };

            effect.apply(&mut record);
            record.transition(record.state.advance());
            record = match self.persist(&record).await? {
                Some(record) => record,
                None => return Ok(RunOutcome::Superseded),
            };
        }

        info!(run_id = %guard.run_id(), runs = record.runs, "Pipeline completed");
        Ok(RunOutcome::Completed)
    }

    /// Run `stage` until it succeeds, fails permanently, exhausts its retry
    /// budget or the run is cancelled. Every attempt is recorded as an outcome.
    async fn execute_with_retry(
        &self,
        stage: Stage,
        record: &mut PipelineRecord,
        cancel: &CancellationToken,
    ) -> Attempt {
        let policy = self.config.policies.for_stage(stage);
        let mut retry = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Attempt::Cancelled,
                result = self.stages.execute(stage, &*record) => result,
            };

            let error = match result {
                Ok(effect) => {
                    record.push_outcome(StageOutcome::success(stage, retry));
                    return Attempt::Succeeded(effect);
                }
                Err(error) => error,
            };

            record.push_outcome(StageOutcome::failed(
                stage,
                error.kind,
                &error.message,
                retry,
            ));
            let attempts = retry + 1;

            if !error.is_retryable() || !policy.allows_retry(attempts) {
                if let Some(effect) = self.stages.degraded_fallback(stage, &error) {
                    warn!(stage = %stage, attempts, error = %error, "Continuing with degraded output");
                    record.push_outcome(StageOutcome::skipped(
                        stage,
                        ErrorKind::EnrichmentDegraded,
                        &error.message,
                        retry,
                    ));
                    return Attempt::Succeeded(effect);
                }
                return Attempt::Failed(error);
            }

            let delay = policy.delay_for(retry);
            warn!(
                stage = %stage,
                attempt = attempts,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Stage failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Attempt::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            retry += 1;
        }
    }

    /// Fingerprint the source object, retrying transient read failures.
    async fn fingerprint_source(
        &self,
        item: &WorkItem,
    ) -> Result<(ObjectSnapshot, ContentFingerprint), (StageError, Vec<StageOutcome>)> {
        let policy: &RetryPolicy = self.config.policies.for_stage(Stage::Replication);
        let mut outcomes = Vec::new();
        let mut retry = 0;

        loop {
            let error = match self
                .stages
                .fingerprinter()
                .fingerprint(item.source_bucket(), item.object_key())
                .await
            {
                Ok(fingerprinted) => return Ok(fingerprinted),
                Err(error) => error,
            };

            outcomes.push(StageOutcome::failed(
                Stage::Replication,
                error.kind,
                &error.message,
                retry,
            ));
            if !error.is_retryable() || !policy.allows_retry(retry + 1) {
                return Err((error, outcomes));
            }

            let delay = policy.delay_for(retry);
            warn!(delay_ms = delay.as_millis() as u64, error = %error, "Source read failed, retrying");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// Write `record` conditionally on its version.
    ///
    /// `None` means another writer moved the record on and this run no longer
    /// owns it.
    async fn persist(
        &self,
        record: &PipelineRecord,
    ) -> Result<Option<PipelineRecord>, PipelineError> {
        match self.records.update(record).await {
            Ok(stored) => Ok(Some(stored)),
            Err(RecordStoreError::VersionConflict { expected, found, .. }) => {
                warn!(key = %record.key, expected, found, "Lost ownership of record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn supersede(&self, mut record: PipelineRecord) -> Result<RunOutcome, PipelineError> {
        info!(key = %record.key, run_id = %record.run_id, "Run superseded");
        record.transition(PipelineState::Superseded);
        self.persist(&record).await?;
        Ok(RunOutcome::Superseded)
    }

    async fn fail(
        &self,
        mut record: PipelineRecord,
        stage: Stage,
        error: StageError,
    ) -> Result<RunOutcome, PipelineError> {
        record.transition(PipelineState::Failed(stage));
        let record = match self.persist(&record).await? {
            Some(record) => record,
            None => return Ok(RunOutcome::Superseded),
        };

        let dead_letter = DeadLetterRecord::from_record(&record, stage, error.kind, &error.message);
        error!(
            key = %record.key,
            stage = %stage,
            error_kind = %error.kind,
            attempts = dead_letter.attempts,
            error = %error.message,
            "Pipeline failed"
        );
        self.publish_dead_letter(&dead_letter, stage).await?;

        Ok(RunOutcome::Failed {
            key: Some(record.key),
            stage,
            kind: error.kind,
        })
    }

    async fn fail_unfingerprinted(
        &self,
        item: WorkItem,
        error: StageError,
        outcomes: Vec<StageOutcome>,
    ) -> Result<RunOutcome, PipelineError> {
        error!(
            error_kind = %error.kind,
            error = %error.message,
            "Could not read source object"
        );
        let dead_letter = DeadLetterRecord::without_record(
            item,
            Stage::Replication,
            error.kind,
            &error.message,
            outcomes,
        );
        self.publish_dead_letter(&dead_letter, Stage::Replication).await?;

        Ok(RunOutcome::Failed {
            key: None,
            stage: Stage::Replication,
            kind: error.kind,
        })
    }

    /// Publish a dead-letter record, retrying under the failed stage's policy.
    async fn publish_dead_letter(
        &self,
        dead_letter: &DeadLetterRecord,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        let policy = self.config.policies.for_stage(stage);
        let mut retry = 0;

        loop {
            let error = match self.dead_letters.publish(dead_letter).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            let attempts = retry + 1;
            if !policy.allows_retry(attempts) {
                error!(
                    object_key = %dead_letter.work_item.object_key(),
                    attempts,
                    error = %error,
                    "Giving up on dead-letter publish"
                );
                return Err(error.into());
            }

            let delay = policy.delay_for(retry);
            warn!(
                object_key = %dead_letter.work_item.object_key(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Dead-letter publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

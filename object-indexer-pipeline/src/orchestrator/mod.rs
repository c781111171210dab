//! Orchestrator module for the object indexer pipeline.
//!
//! Feeds notifications through intake and hands admitted work items to a
//! bounded pool of coordinator workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::coordinator::{Coordinator, RunOutcome};
use crate::errors::PipelineError;
use crate::intake::{Admission, EventIntake, RawNotification, StreamMessage};
use object_indexer_shared::WorkItem;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Size of the message channel buffer.
    pub channel_buffer_size: usize,
    /// Maximum number of work items processed at once.
    pub worker_concurrency: usize,
    /// How often expired records and event IDs are purged.
    pub janitor_interval: Duration,
    /// How long terminal records are kept.
    pub record_retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
            worker_concurrency: 16,
            janitor_interval: Duration::from_secs(60),
            record_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Default)]
struct OrchestratorStats {
    received: AtomicU64,
    admitted: AtomicU64,
    duplicates: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    short_circuited: AtomicU64,
    absorbed: AtomicU64,
    superseded: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the orchestrator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub admitted: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub completed: u64,
    pub short_circuited: u64,
    pub absorbed: u64,
    pub superseded: u64,
    pub stale: u64,
    pub failed: u64,
    pub errors: u64,
}

impl OrchestratorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            absorbed: self.absorbed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrator that coordinates the pipeline components.
///
/// The orchestrator:
/// - Runs notifications through intake
/// - Bounds the number of work items in flight
/// - Purges expired records and event IDs
/// - Handles shutdown signals
pub struct Orchestrator {
    intake: Arc<EventIntake>,
    coordinator: Arc<Coordinator>,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
    stats: Arc<OrchestratorStats>,
}

impl Orchestrator {
    /// Create a new orchestrator with the given components.
    pub fn new(intake: EventIntake, coordinator: Coordinator) -> Self {
        Self::with_config(intake, coordinator, OrchestratorConfig::default())
    }

    /// Create a new orchestrator with custom configuration.
    pub fn with_config(
        intake: EventIntake,
        coordinator: Coordinator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            intake: Arc::new(intake),
            coordinator: Arc::new(coordinator),
            config,
            shutdown: CancellationToken::new(),
            stats: Arc::new(OrchestratorStats::default()),
        }
    }

    /// Create the channel a notification source writes into.
    ///
    /// The channel is bounded; once the worker pool is saturated senders wait.
    pub fn channel(&self) -> (mpsc::Sender<StreamMessage>, mpsc::Receiver<StreamMessage>) {
        mpsc::channel(self.config.channel_buffer_size.max(1))
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the orchestrator.
    ///
    /// Consumes `rx` until the source reports `End`, the channel closes, a
    /// shutdown is requested or Ctrl-C is received. Work items already handed
    /// to workers are always allowed to finish; admitted items still waiting
    /// for a worker slot at shutdown are dropped.
    ///
    /// The next message is only read once every admitted item has a worker,
    /// which is what pushes back on the notification channel.
    #[instrument(skip(self, rx))]
    pub async fn run(&self, mut rx: mpsc::Receiver<StreamMessage>) -> Result<(), PipelineError> {
        info!(
            worker_concurrency = self.config.worker_concurrency,
            "Starting object indexer orchestrator"
        );

        // Ensure the search index exists
        self.coordinator.ensure_index().await?;

        let permits = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut workers: JoinSet<Result<RunOutcome, PipelineError>> = JoinSet::new();
        let mut janitor = tokio::time::interval(self.config.janitor_interval);
        janitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        janitor.tick().await;
        let mut backlog: VecDeque<WorkItem> = VecDeque::new();

        loop {
            tokio::select! {
                msg = rx.recv(), if backlog.is_empty() => {
                    match msg {
                        Some(StreamMessage::Notifications(batch)) => {
                            backlog.extend(batch.into_iter().filter_map(|raw| self.admit(raw)));
                        }
                        Some(StreamMessage::Error(e)) => {
                            error!(error = %e, "Received error from notification source");
                        }
                        Some(StreamMessage::End) | None => {
                            info!("Notification stream ended");
                            break;
                        }
                    }
                }
                permit = permits.clone().acquire_owned(), if !backlog.is_empty() => {
                    let permit = permit.map_err(|e| PipelineError::channel(e.to_string()))?;
                    if let Some(item) = backlog.pop_front() {
                        self.spawn_worker(item, permit, &mut workers);
                    }
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    self.record_result(joined);
                }
                _ = janitor.tick() => {
                    self.purge_expired().await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        if !backlog.is_empty() {
            warn!(dropped = backlog.len(), "Dropping admitted work items without a worker");
        }

        // Let in-flight work items finish
        let in_flight = workers.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight work items");
        }
        while let Some(joined) = workers.join_next().await {
            self.record_result(joined);
        }

        let stats = self.stats();
        info!(
            received = stats.received,
            admitted = stats.admitted,
            completed = stats.completed,
            failed = stats.failed,
            "Orchestrator shutdown complete"
        );
        Ok(())
    }

    /// Run one notification through intake, returning the admitted work item.
    fn admit(&self, raw: RawNotification) -> Option<WorkItem> {
        OrchestratorStats::bump(&self.stats.received);

        let item = match self.intake.admit(raw) {
            Ok(Admission::Admitted(item)) => item,
            Ok(Admission::Duplicate { event_id }) => {
                debug!(event_id = %event_id, "Dropped duplicate notification");
                OrchestratorStats::bump(&self.stats.duplicates);
                return None;
            }
            Ok(Admission::Ignored { event_id, event_name }) => {
                debug!(event_id = %event_id, event_name = ?event_name, "Ignored notification");
                OrchestratorStats::bump(&self.stats.ignored);
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Rejected notification");
                OrchestratorStats::bump(&self.stats.rejected);
                return None;
            }
        };

        OrchestratorStats::bump(&self.stats.admitted);
        Some(item)
    }

    fn spawn_worker(
        &self,
        item: WorkItem,
        permit: OwnedSemaphorePermit,
        workers: &mut JoinSet<Result<RunOutcome, PipelineError>>,
    ) {
        let coordinator = self.coordinator.clone();
        workers.spawn(async move {
            let _permit = permit;
            coordinator.handle(item).await
        });
    }

    fn record_result(&self, joined: Result<Result<RunOutcome, PipelineError>, JoinError>) {
        let counter = match joined {
            Ok(Ok(RunOutcome::Completed)) => &self.stats.completed,
            Ok(Ok(RunOutcome::AlreadyCompleted)) => &self.stats.short_circuited,
            Ok(Ok(RunOutcome::Absorbed)) => &self.stats.absorbed,
            Ok(Ok(RunOutcome::Superseded)) => &self.stats.superseded,
            Ok(Ok(RunOutcome::Stale)) => &self.stats.stale,
            Ok(Ok(RunOutcome::Failed { .. })) => &self.stats.failed,
            Ok(Err(e)) => {
                error!(error = %e, "Work item could not be handled");
                &self.stats.errors
            }
            Err(e) => {
                error!(error = %PipelineError::worker(e.to_string()), "Worker task failed");
                &self.stats.errors
            }
        };
        OrchestratorStats::bump(counter);
    }

    async fn purge_expired(&self) {
        let now = Utc::now();
        let events = self.intake.purge_expired(now);
        match self
            .coordinator
            .purge_expired(now, self.config.record_retention)
            .await
        {
            Ok(records) => debug!(records, events, "Janitor pass complete"),
            Err(e) => warn!(error = %e, "Failed to purge expired records"),
        }
    }

    /// Trigger a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

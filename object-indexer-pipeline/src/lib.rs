//! # Object Indexer Pipeline
//!
//! This crate provides the pipeline that turns object change notifications
//! into replicated, enriched and indexed objects.
//!
//! ## Architecture
//!
//! 1. **Intake**: Normalizes notifications into work items and drops
//!    redelivered event IDs
//! 2. **Stages**: Replication, enrichment, metadata commit and indexing, each
//!    a single call against an external collaborator
//! 3. **Coordinator**: Drives the per-record state machine, owns retries,
//!    per-key exclusivity and dead-lettering
//! 4. **Orchestrator**: Feeds admitted work items to a bounded worker pool

pub mod coordinator;
pub mod errors;
pub mod intake;
pub mod orchestrator;
pub mod retry;
pub mod stages;

pub use coordinator::{Coordinator, CoordinatorConfig, RunOutcome};
pub use errors::{IntakeError, PipelineError, StageError};
pub use intake::{Admission, EventIntake, IntakeConfig, RawNotification, StreamMessage};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StatsSnapshot};
pub use retry::{RetryPolicy, StagePolicies};
pub use stages::{StageConfig, StageSet};

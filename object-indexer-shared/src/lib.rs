//! # Object Indexer Shared
//!
//! Shared types for the object replication and indexing pipeline.
//!
//! Everything that crosses a crate boundary lives here: the canonical
//! [`WorkItem`] produced by intake, the [`PipelineRecord`] the coordinator
//! persists per `(object key, content fingerprint)`, the metadata produced by
//! enrichment, and the document published to the search index.

pub mod dead_letter;
pub mod document;
pub mod fingerprint;
pub mod metadata;
pub mod record;
pub mod snapshot;
pub mod stage;
pub mod work_item;

pub use dead_letter::DeadLetterRecord;
pub use document::IndexDocument;
pub use fingerprint::{ContentFingerprint, FingerprintBuilder, FingerprintError};
pub use metadata::{EnrichedMetadata, DEFAULT_METADATA_PREFIX};
pub use record::{PipelineRecord, PipelineState, RecordKey};
pub use snapshot::ObjectSnapshot;
pub use stage::{ErrorClass, ErrorKind, Stage, StageOutcome, StageStatus};
pub use work_item::WorkItem;

//! # Object Indexer Repository
//!
//! This crate provides the collaborator contracts the pipeline core consumes:
//! the object store, the enrichment provider, the search index, the pipeline
//! record store and the dead-letter sink. It includes the error types for each
//! of them and in-process implementations used for local runs and tests.

pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod sinks;

pub use errors::{
    DeadLetterError, EnrichmentError, ObjectStoreError, RecordStoreError, SearchIndexError,
};
pub use interfaces::{
    ByteStream, ContentSample, DeadLetterSink, EnrichmentProvider, ObjectBody, ObjectStore,
    PipelineRecordStore, ProviderOutput, PutObjectRequest, SearchIndex,
};
pub use sinks::JsonLinesDeadLetterSink;

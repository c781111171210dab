//! Interface definitions for the pipeline's external collaborators.
//!
//! Every collaborator is an `async_trait` object behind an `Arc`, so the
//! coordinator and stages can be wired against real clients or the in-process
//! implementations in [`crate::memory`].

mod dead_letter_sink;
mod enrichment_provider;
mod object_store;
mod record_store;
mod search_index;

pub use dead_letter_sink::DeadLetterSink;
pub use enrichment_provider::{ContentSample, EnrichmentProvider, ProviderOutput};
pub use object_store::{ByteStream, ObjectBody, ObjectStore, PutObjectRequest};
pub use record_store::PipelineRecordStore;
pub use search_index::SearchIndex;

//! In-process implementations of the collaborator contracts.
//!
//! These back the local runner and the test suites. They honour the same
//! contracts as networked implementations: conditional writes, atomic puts and
//! idempotent upserts.

mod dead_letter;
mod enrichment;
mod object_store;
mod record_store;
mod search_index;

pub use dead_letter::InMemoryDeadLetterSink;
pub use enrichment::{SniffingEnrichmentProvider, StaticEnrichmentProvider};
pub use object_store::InMemoryObjectStore;
pub use record_store::InMemoryRecordStore;
pub use search_index::InMemorySearchIndex;

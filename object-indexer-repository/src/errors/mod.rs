//! Error types for the collaborator contracts.

mod dead_letter_error;
mod enrichment_error;
mod object_store_error;
mod record_store_error;
mod search_index_error;

pub use dead_letter_error::DeadLetterError;
pub use enrichment_error::EnrichmentError;
pub use object_store_error::ObjectStoreError;
pub use record_store_error::RecordStoreError;
pub use search_index_error::SearchIndexError;

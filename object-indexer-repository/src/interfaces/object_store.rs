//! Object store trait definition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::errors::ObjectStoreError;
use object_indexer_shared::ObjectSnapshot;

/// Chunked object content.
pub type ByteStream = BoxStream<'static, Result<Bytes, ObjectStoreError>>;

/// An object's snapshot together with its content stream.
pub struct ObjectBody {
    pub snapshot: ObjectSnapshot,
    pub stream: ByteStream,
}

/// Target and attributes for a streamed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Abstract interface for object storage operations.
///
/// Implementations must be `Send + Sync`. Writes are atomic: a `put` or `copy`
/// that is dropped before it resolves leaves no partially written object
/// visible under the target key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's snapshot without its content.
    ///
    /// # Returns
    ///
    /// * `Ok(ObjectSnapshot)` - Current etag, size, content type and metadata
    /// * `Err(ObjectStoreError::NotFound)` - If the object does not exist
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectSnapshot, ObjectStoreError>;

    /// Fetch an object's snapshot and a stream over its content.
    ///
    /// Dropping the stream early releases the underlying connection.
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectBody, ObjectStoreError>;

    /// Whether `copy` is executed by the store without streaming through us.
    fn supports_server_side_copy(&self) -> bool {
        true
    }

    /// Copy an object, including its metadata, to another bucket/key.
    ///
    /// # Arguments
    ///
    /// * `if_source_etag` - When set, the copy only proceeds if the source
    ///   still has this etag
    ///
    /// # Returns
    ///
    /// * `Ok(ObjectSnapshot)` - Snapshot of the written target
    /// * `Err(ObjectStoreError::PreconditionFailed)` - If the source changed
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        if_source_etag: Option<&str>,
    ) -> Result<ObjectSnapshot, ObjectStoreError>;

    /// Write an object from a byte stream.
    async fn put(
        &self,
        request: PutObjectRequest,
        body: ByteStream,
    ) -> Result<ObjectSnapshot, ObjectStoreError>;

    /// Replace an object's metadata, guarded by its current etag.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The object's new etag
    /// * `Err(ObjectStoreError::PreconditionFailed)` - If the etag no longer
    ///   matches because another writer got there first
    async fn put_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
        if_match_etag: &str,
    ) -> Result<String, ObjectStoreError>;
}

//! In-memory object store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ObjectStoreError;
use crate::interfaces::{ByteStream, ObjectBody, ObjectStore, PutObjectRequest};
use object_indexer_shared::ObjectSnapshot;

/// Default size of the chunks handed out by `get`.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    version_id: String,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
}

/// Object store held in a concurrent map keyed by `(bucket, key)`.
///
/// Every content or metadata write assigns a fresh etag.
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
    server_side_copy: bool,
    chunk_size: usize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            server_side_copy: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Disable server-side copy so replication streams the bytes.
    pub fn with_server_side_copy(mut self, enabled: bool) -> Self {
        self.server_side_copy = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Store an object directly, as an external writer would.
    pub fn insert_object(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> ObjectSnapshot {
        let stored = StoredObject {
            data: data.into(),
            etag: next_etag(),
            version_id: next_etag(),
            content_type: content_type.map(str::to_string),
            metadata,
        };
        let snapshot = snapshot(bucket, key, &stored);
        self.objects
            .insert((bucket.to_string(), key.to_string()), stored);
        snapshot
    }

    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<BTreeMap<String, String>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn load(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.value().clone())
            .ok_or_else(|| ObjectStoreError::not_found(bucket, key))
    }

    fn chunks(&self, data: &Bytes) -> ByteStream {
        let chunk_size = self.chunk_size;
        let chunks: Vec<Result<Bytes, ObjectStoreError>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        futures::stream::iter(chunks).boxed()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectSnapshot, ObjectStoreError> {
        let stored = self.load(bucket, key)?;
        Ok(snapshot(bucket, key, &stored))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectBody, ObjectStoreError> {
        let stored = self.load(bucket, key)?;
        Ok(ObjectBody {
            snapshot: snapshot(bucket, key, &stored),
            stream: self.chunks(&stored.data),
        })
    }

    fn supports_server_side_copy(&self) -> bool {
        self.server_side_copy
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        if_source_etag: Option<&str>,
    ) -> Result<ObjectSnapshot, ObjectStoreError> {
        let source = self.load(src_bucket, src_key)?;
        if let Some(expected) = if_source_etag {
            if source.etag != expected {
                return Err(ObjectStoreError::precondition_failed(expected, source.etag));
            }
        }

        let copied = StoredObject {
            etag: next_etag(),
            version_id: next_etag(),
            ..source
        };
        let written = snapshot(dst_bucket, dst_key, &copied);
        self.objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), copied);

        debug!(src_bucket, dst_bucket, key = dst_key, "Server-side copy complete");
        Ok(written)
    }

    async fn put(
        &self,
        request: PutObjectRequest,
        mut body: ByteStream,
    ) -> Result<ObjectSnapshot, ObjectStoreError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let stored = StoredObject {
            data: buffer.freeze(),
            etag: next_etag(),
            version_id: next_etag(),
            content_type: request.content_type,
            metadata: request.metadata,
        };
        let written = snapshot(&request.bucket, &request.key, &stored);
        self.objects.insert((request.bucket, request.key), stored);
        Ok(written)
    }

    async fn put_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
        if_match_etag: &str,
    ) -> Result<String, ObjectStoreError> {
        let mut stored = self
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| ObjectStoreError::not_found(bucket, key))?;

        if stored.etag != if_match_etag {
            return Err(ObjectStoreError::precondition_failed(
                if_match_etag,
                stored.etag.clone(),
            ));
        }

        stored.metadata = metadata.clone();
        stored.etag = next_etag();
        Ok(stored.etag.clone())
    }
}

fn snapshot(bucket: &str, key: &str, stored: &StoredObject) -> ObjectSnapshot {
    let mut snapshot = ObjectSnapshot::new(bucket, key, stored.etag.clone(), stored.data.len() as u64)
        .with_version_id(stored.version_id.clone())
        .with_metadata(stored.metadata.clone());
    snapshot.content_type = stored.content_type.clone();
    snapshot
}

fn next_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

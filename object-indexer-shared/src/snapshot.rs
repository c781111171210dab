//! Read-only view of a stored object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object state as reported by the object store.
///
/// Comparing etags between two snapshots is how the pipeline detects that
/// somebody else changed the object in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub version_id: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectSnapshot {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        etag: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            etag: etag.into(),
            version_id: None,
            size,
            content_type: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether both snapshots describe the same stored revision.
    pub fn same_revision(&self, other: &ObjectSnapshot) -> bool {
        self.bucket == other.bucket
            && self.key == other.key
            && self.etag == other.etag
            && self.version_id == other.version_id
    }
}

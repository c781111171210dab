//! Canonical work item produced by event intake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized object change notification.
///
/// The bucket and key fields are set once at construction and never change.
/// Only the attempt counter moves, each time the coordinator picks the item up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    event_id: String,
    source_bucket: String,
    target_bucket: String,
    object_key: String,
    version_id: Option<String>,
    received_at: DateTime<Utc>,
    attempt_count: u32,
}

impl WorkItem {
    /// Create a new work item received now.
    pub fn new(
        event_id: impl Into<String>,
        source_bucket: impl Into<String>,
        target_bucket: impl Into<String>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            source_bucket: source_bucket.into(),
            target_bucket: target_bucket.into(),
            object_key: object_key.into(),
            version_id: None,
            received_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Set the object version reported by the notification.
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Override the receive timestamp.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn source_bucket(&self) -> &str {
        &self.source_bucket
    }

    pub fn target_bucket(&self) -> &str {
        &self.target_bucket
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Count one more coordinator pickup and return the new total.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}

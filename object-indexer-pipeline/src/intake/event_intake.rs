//! Normalization and first-level dedup of raw notifications.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::errors::IntakeError;
use crate::intake::{EventDeduplicator, RawNotification};
use object_indexer_shared::WorkItem;

/// Configuration for event intake.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Source bucket to target bucket.
    pub routes: HashMap<String, String>,
    /// Target for source buckets without an explicit route.
    pub default_target: Option<String>,
    /// How long event IDs are remembered for dedup.
    pub dedup_retention: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            default_target: None,
            dedup_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl IntakeConfig {
    pub fn with_route(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.routes.insert(source.into(), target.into());
        self
    }

    pub fn with_default_target(mut self, target: impl Into<String>) -> Self {
        self.default_target = Some(target.into());
        self
    }

    pub fn with_dedup_retention(mut self, retention: Duration) -> Self {
        self.dedup_retention = retention;
        self
    }

    /// Target bucket for `source`, if any.
    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.routes
            .get(source)
            .or(self.default_target.as_ref())
            .map(String::as_str)
    }
}

/// What intake decided about a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New work for the coordinator.
    Admitted(WorkItem),
    /// The event ID was already admitted.
    Duplicate { event_id: String },
    /// Not an object-created event.
    Ignored {
        event_id: String,
        event_name: Option<String>,
    },
}

/// Normalizes notifications into work items.
///
/// Intake never looks at object content; content-level dedup is the
/// coordinator's job.
pub struct EventIntake {
    config: IntakeConfig,
    dedup: EventDeduplicator,
}

impl EventIntake {
    pub fn new(config: IntakeConfig) -> Self {
        let dedup = EventDeduplicator::new(config.dedup_retention);
        Self { config, dedup }
    }

    /// Normalize a notification without touching the dedup set.
    ///
    /// # Returns
    ///
    /// * `Ok(WorkItem)` - The canonical work item
    /// * `Err(IntakeError::MalformedEvent)` - If event ID, bucket or key is missing
    /// * `Err(IntakeError::UnroutedBucket)` - If the source bucket has no target
    pub fn normalize(&self, raw: RawNotification) -> Result<WorkItem, IntakeError> {
        let event_id = required(raw.event_id, "event ID")?;
        let bucket = required(raw.bucket, "bucket")?;
        let key = required(raw.key, "object key")?;

        let target = self
            .config
            .target_for(&bucket)
            .ok_or_else(|| IntakeError::UnroutedBucket(bucket.clone()))?
            .to_string();

        let mut item = WorkItem::new(event_id, bucket, target, key);
        if let Some(version_id) = raw.version_id {
            item = item.with_version_id(version_id);
        }
        if let Some(event_time) = raw.event_time {
            item = item.with_received_at(event_time);
        }
        Ok(item)
    }

    /// Normalize a notification and run it through event-ID dedup.
    #[instrument(skip(self, raw), fields(event_id = raw.event_id.as_deref().unwrap_or("")))]
    pub fn admit(&self, raw: RawNotification) -> Result<Admission, IntakeError> {
        self.admit_at(raw, Utc::now())
    }

    pub(crate) fn admit_at(
        &self,
        raw: RawNotification,
        now: DateTime<Utc>,
    ) -> Result<Admission, IntakeError> {
        let created = raw.is_object_created();
        let event_name = raw.event_name.clone();
        let item = self.normalize(raw)?;

        if !created {
            debug!(event_name = ?event_name, "Ignoring non-create notification");
            return Ok(Admission::Ignored {
                event_id: item.event_id().to_string(),
                event_name,
            });
        }

        if !self.dedup.check_and_mark(item.event_id(), now) {
            debug!(object_key = item.object_key(), "Duplicate notification");
            return Ok(Admission::Duplicate {
                event_id: item.event_id().to_string(),
            });
        }

        Ok(Admission::Admitted(item))
    }

    /// Forget event IDs past the retention window.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.dedup.purge_expired(now)
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, IntakeError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| IntakeError::malformed(format!("missing {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> EventIntake {
        EventIntake::new(IntakeConfig::default().with_route("raw", "processed"))
    }

    #[test]
    fn test_admits_new_event() {
        let admission = intake()
            .admit(RawNotification::object_created("evt-1", "raw", "img/1.png"))
            .unwrap();

        match admission {
            Admission::Admitted(item) => {
                assert_eq!(item.event_id(), "evt-1");
                assert_eq!(item.source_bucket(), "raw");
                assert_eq!(item.target_bucket(), "processed");
                assert_eq!(item.object_key(), "img/1.png");
                assert_eq!(item.attempt_count(), 0);
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[test]
    fn test_replayed_event_is_duplicate() {
        let intake = intake();
        let raw = RawNotification::object_created("evt-1", "raw", "img/1.png");

        assert!(matches!(
            intake.admit(raw.clone()).unwrap(),
            Admission::Admitted(_)
        ));
        assert_eq!(
            intake.admit(raw).unwrap(),
            Admission::Duplicate {
                event_id: "evt-1".to_string()
            }
        );
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let intake = intake();
        let mut raw = RawNotification::object_created("evt-1", "raw", "img/1.png");
        raw.key = None;

        assert!(matches!(
            intake.admit(raw),
            Err(IntakeError::MalformedEvent(_))
        ));

        let mut raw = RawNotification::object_created("", "raw", "img/1.png");
        raw.event_id = Some("  ".to_string());
        assert!(matches!(
            intake.admit(raw),
            Err(IntakeError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_malformed_event_does_not_consume_event_id() {
        let intake = intake();
        let mut raw = RawNotification::object_created("evt-1", "raw", "img/1.png");
        raw.bucket = None;
        assert!(intake.admit(raw).is_err());

        let admission = intake
            .admit(RawNotification::object_created("evt-1", "raw", "img/1.png"))
            .unwrap();
        assert!(matches!(admission, Admission::Admitted(_)));
    }

    #[test]
    fn test_routing() {
        let intake = intake();
        let result = intake.admit(RawNotification::object_created("evt-1", "other", "a"));
        assert_eq!(result, Err(IntakeError::UnroutedBucket("other".to_string())));

        let intake = EventIntake::new(IntakeConfig::default().with_default_target("archive"));
        let item = intake
            .normalize(RawNotification::object_created("evt-1", "other", "a"))
            .unwrap();
        assert_eq!(item.target_bucket(), "archive");
    }

    #[test]
    fn test_ignores_removals() {
        let mut raw = RawNotification::object_created("evt-1", "raw", "a");
        raw.event_name = Some("s3:ObjectRemoved:Delete".to_string());

        let admission = intake().admit(raw).unwrap();
        assert!(matches!(admission, Admission::Ignored { .. }));
    }

    #[test]
    fn test_dedup_window_expires() {
        let intake = EventIntake::new(
            IntakeConfig::default()
                .with_route("raw", "processed")
                .with_dedup_retention(Duration::from_secs(60)),
        );
        let raw = RawNotification::object_created("evt-1", "raw", "a");
        let now = Utc::now();

        intake.admit_at(raw.clone(), now).unwrap();
        let later = now + chrono::Duration::seconds(120);
        assert_eq!(intake.purge_expired(later), 1);
        assert!(matches!(
            intake.admit_at(raw, later).unwrap(),
            Admission::Admitted(_)
        ));
    }
}

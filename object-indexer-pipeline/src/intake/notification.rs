//! Raw notifications and the S3/MinIO bucket notification format.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::IntakeError;

/// A notification before normalization.
///
/// Every field is optional here; intake decides which ones are required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawNotification {
    pub event_id: Option<String>,
    /// e.g. `s3:ObjectCreated:Put`. Absent for sources that only report writes.
    pub event_name: Option<String>,
    pub bucket: Option<String>,
    /// Object key, already URL-decoded.
    pub key: Option<String>,
    pub version_id: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
}

impl RawNotification {
    /// Notification for a created object.
    pub fn object_created(
        event_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Some(event_id.into()),
            event_name: Some("s3:ObjectCreated:Put".to_string()),
            bucket: Some(bucket.into()),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Whether the notification reports a created or overwritten object.
    pub fn is_object_created(&self) -> bool {
        self.event_name
            .as_deref()
            .map_or(true, |name| name.contains("ObjectCreated"))
    }
}

#[derive(Deserialize)]
struct BucketNotification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRecord {
    event_id: Option<String>,
    event_name: Option<String>,
    event_time: Option<String>,
    response_elements: Option<ResponseElements>,
    s3: Option<S3Entity>,
}

#[derive(Deserialize)]
struct ResponseElements {
    #[serde(rename = "x-amz-request-id")]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: Option<S3Bucket>,
    object: Option<S3Object>,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3Object {
    key: Option<String>,
    version_id: Option<String>,
    sequencer: Option<String>,
}

/// Parse an S3/MinIO bucket notification document.
///
/// One result is produced per entry in `Records`, so a record with an
/// undecodable key fails alone while its siblings still go through. Only a
/// document that is not valid JSON fails as a whole. When a record has no
/// explicit `eventId`, the request ID and the object sequencer together
/// identify it.
pub fn parse_bucket_notification(
    payload: &[u8],
) -> Result<Vec<Result<RawNotification, IntakeError>>, IntakeError> {
    let document: BucketNotification =
        serde_json::from_slice(payload).map_err(|e| IntakeError::parse(e.to_string()))?;

    Ok(document
        .records
        .into_iter()
        .map(NotificationRecord::into_raw)
        .collect())
}

impl NotificationRecord {
    fn into_raw(self) -> Result<RawNotification, IntakeError> {
        let (bucket, object) = match self.s3 {
            Some(s3) => (s3.bucket.and_then(|b| b.name), s3.object),
            None => (None, None),
        };
        let (key, version_id, sequencer) = match object {
            Some(o) => (o.key, o.version_id, o.sequencer),
            None => (None, None, None),
        };

        let request_id = self.response_elements.and_then(|r| r.request_id);
        let event_id = self.event_id.or_else(|| match (request_id, &sequencer) {
            (Some(request), Some(sequencer)) => Some(format!("{request}:{sequencer}")),
            _ => None,
        });

        let key = key.map(|k| decode_key(&k)).transpose()?;
        let event_time = self
            .event_time
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(RawNotification {
            event_id,
            event_name: self.event_name,
            bucket,
            key,
            version_id,
            event_time,
        })
    }
}

/// Object keys arrive form-encoded: `+` is a space, the rest is percent-encoded.
fn decode_key(key: &str) -> Result<String, IntakeError> {
    urlencoding::decode(&key.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| IntakeError::malformed(format!("Undecodable object key {key}: {e}")))
}

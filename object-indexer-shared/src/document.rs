//! Search index document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fingerprint::ContentFingerprint;
use crate::record::PipelineRecord;

/// Top-level document fields that enrichment properties may not shadow.
const RESERVED_FIELDS: [&str; 8] = [
    "key",
    "class_name",
    "fingerprint",
    "bucket",
    "source_bucket",
    "size",
    "content_type",
    "degraded",
];

/// Document upserted into the search index, keyed by object key.
///
/// Built purely from the pipeline record, so indexing the same key and
/// fingerprint twice produces the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub key: String,
    pub class_name: String,
    pub fingerprint: ContentFingerprint,
    pub bucket: String,
    pub source_bucket: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub degraded: bool,
    /// Enrichment fields, unprefixed.
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

impl IndexDocument {
    /// Build the document for a record that has been replicated and enriched.
    ///
    /// Returns `None` when either stage output is missing.
    pub fn from_record(record: &PipelineRecord, class_name: &str) -> Option<Self> {
        let replica = record.replica.as_ref()?;
        let enrichment = record.enrichment.as_ref()?;

        let properties = enrichment
            .fields()
            .iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            key: record.key.object_key.clone(),
            class_name: class_name.to_string(),
            fingerprint: record.key.fingerprint.clone(),
            bucket: replica.bucket.clone(),
            source_bucket: record.work_item.source_bucket().to_string(),
            size: replica.size,
            content_type: replica.content_type.clone(),
            degraded: enrichment.is_degraded(),
            properties,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EnrichedMetadata, DEFAULT_METADATA_PREFIX};
    use crate::snapshot::ObjectSnapshot;
    use crate::work_item::WorkItem;
    use serde_json::json;

    fn enriched_record() -> PipelineRecord {
        let item = WorkItem::new("evt", "raw", "processed", "img/1.png");
        let source = ObjectSnapshot::new("raw", "img/1.png", "e1", 3);
        let mut record = PipelineRecord::new(item, ContentFingerprint::of(b"png"), source);
        record.replica =
            Some(ObjectSnapshot::new("processed", "img/1.png", "e2", 3).with_content_type("image/png"));
        record.enrichment = Some(EnrichedMetadata::from_provider(
            vec![
                ("category".to_string(), json!("photo")),
                ("size".to_string(), json!("huge")),
            ],
            DEFAULT_METADATA_PREFIX,
        ));
        record
    }

    #[test]
    fn test_from_record() {
        let doc = IndexDocument::from_record(&enriched_record(), "ObjectDocument").unwrap();

        assert_eq!(doc.key, "img/1.png");
        assert_eq!(doc.bucket, "processed");
        assert_eq!(doc.source_bucket, "raw");
        assert_eq!(doc.size, 3);
        assert_eq!(doc.properties.get("category").map(String::as_str), Some("photo"));
        // Shadowing a reserved field is dropped.
        assert!(!doc.properties.contains_key("size"));
    }

    #[test]
    fn test_json_is_flat() {
        let doc = IndexDocument::from_record(&enriched_record(), "ObjectDocument").unwrap();
        let value = doc.to_json();

        assert_eq!(value["key"], json!("img/1.png"));
        assert_eq!(value["category"], json!("photo"));
        assert_eq!(value["size"], json!(3));
    }

    #[test]
    fn test_requires_stage_outputs() {
        let mut record = enriched_record();
        record.enrichment = None;
        assert!(IndexDocument::from_record(&record, "ObjectDocument").is_none());
    }

    #[test]
    fn test_same_record_same_document() {
        let record = enriched_record();
        assert_eq!(
            IndexDocument::from_record(&record, "C"),
            IndexDocument::from_record(&record, "C")
        );
    }
}

//! Enrichment metadata and the namespaced merge policy.
//!
//! Enrichment keys are stored unprefixed and only gain the reserved prefix
//! when they are written onto an object. User metadata outside the prefix is
//! never touched by a merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved metadata namespace for enrichment keys.
pub const DEFAULT_METADATA_PREFIX: &str = "x-enriched-";

/// Field written when enrichment gave up and the pipeline continued.
pub const DEGRADED_FIELD: &str = "degraded";

/// Metadata derived from object content by the enrichment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedMetadata {
    fields: BTreeMap<String, String>,
    degraded: bool,
}

impl EnrichedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder used when enrichment was abandoned under the degrade policy.
    pub fn degraded() -> Self {
        Self {
            fields: BTreeMap::new(),
            degraded: true,
        }
    }

    /// Normalize raw provider output.
    ///
    /// Keys are lowercased, characters outside `[a-z0-9-]` become `-`, and a
    /// leading reserved prefix is stripped so it is never doubled. String values
    /// are kept verbatim; other JSON values are rendered compactly. Null values
    /// and keys that normalize to nothing are dropped.
    pub fn from_provider<I>(output: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut metadata = Self::new();
        for (key, value) in output {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s,
                other => other.to_string(),
            };
            metadata.insert_with_prefix(&key, value, prefix);
        }
        metadata
    }

    /// Insert a field, normalizing the key.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.insert_with_prefix(key, value, DEFAULT_METADATA_PREFIX);
    }

    fn insert_with_prefix(&mut self, key: &str, value: impl Into<String>, prefix: &str) {
        let normalized = normalize_key(key);
        let stripped = normalized
            .strip_prefix(prefix)
            .unwrap_or(&normalized)
            .trim_matches('-');
        if stripped.is_empty() || stripped == DEGRADED_FIELD {
            return;
        }
        self.fields.insert(stripped.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Unprefixed enrichment fields.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && !self.degraded
    }

    /// Render the fields as object metadata under `prefix`.
    pub fn to_object_metadata(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut rendered: BTreeMap<String, String> = self
            .fields
            .iter()
            .map(|(k, v)| (format!("{prefix}{k}"), v.clone()))
            .collect();
        if self.degraded {
            rendered.insert(format!("{prefix}{DEGRADED_FIELD}"), "true".to_string());
        }
        rendered
    }

    /// Merge into an object's existing metadata.
    ///
    /// Keys outside the reserved namespace are preserved as-is. Inside the
    /// namespace this enrichment wins on collision; older enrichment keys it
    /// does not mention are kept. A stale degraded flag is cleared when this
    /// enrichment is complete.
    pub fn merge_into(
        &self,
        existing: &BTreeMap<String, String>,
        prefix: &str,
    ) -> BTreeMap<String, String> {
        let mut merged = existing.clone();
        merged.extend(self.to_object_metadata(prefix));

        let degraded_key = format!("{prefix}{DEGRADED_FIELD}");
        if !self.degraded && merged.contains_key(&degraded_key) {
            merged.insert(degraded_key, "false".to_string());
        }
        merged
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

//! Record types flowing from a partition into the unified collection.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Provenance field naming the partition a record came from.
pub const SOURCE_PARTITION_FIELD: &str = "source_partition";

/// Provenance field holding the write timestamp (RFC 3339, UTC).
pub const MIGRATED_AT_FIELD: &str = "migrated_at";

/// A record as enumerated from a source partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Original record identifier, unique across partitions by convention.
    pub key: String,
    /// Original fields, untouched.
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

/// A record destined for the unified collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub key: String,
    pub fields: Map<String, Value>,
    pub source_partition: String,
    pub migrated_at: DateTime<Utc>,
}

impl UnifiedRecord {
    /// Attach provenance to a raw record.
    pub fn stamp(raw: RawRecord, partition: &str, migrated_at: DateTime<Utc>) -> Self {
        Self {
            key: raw.key,
            fields: raw.fields,
            source_partition: partition.to_string(),
            migrated_at,
        }
    }

    /// The stored document: original fields plus both provenance fields.
    ///
    /// Provenance wins over a same-named source field.
    pub fn document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert(
            SOURCE_PARTITION_FIELD.to_string(),
            Value::String(self.source_partition.clone()),
        );
        doc.insert(
            MIGRATED_AT_FIELD.to_string(),
            Value::String(self.migrated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(doc)
    }
}

/// Unified-collection record counts grouped by provenance tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceCounts {
    /// Count per `source_partition` value.
    pub tagged: BTreeMap<String, u64>,
    /// Records without a usable `source_partition`.
    pub untagged: u64,
}

impl ProvenanceCounts {
    /// Count for one tag, zero if absent.
    pub fn get(&self, partition: &str) -> u64 {
        self.tagged.get(partition).copied().unwrap_or(0)
    }

    /// Add `count` records under `tag`; blank or missing tags count as untagged.
    pub fn add(&mut self, tag: Option<&str>, count: u64) {
        match tag {
            Some(tag) if !tag.is_empty() => *self.tagged.entry(tag.to_string()).or_insert(0) += count,
            _ => self.untagged += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.tagged.values().sum::<u64>() + self.untagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_document_carries_provenance() {
        let raw = RawRecord::new("u1", fields(json!({"name": "Ada", "planning_schedule": "daily"})));
        let at = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = UnifiedRecord::stamp(raw, "instance1", at);

        let doc = record.document();
        assert_eq!(doc["name"], "Ada");
        assert_eq!(doc["planning_schedule"], "daily");
        assert_eq!(doc[SOURCE_PARTITION_FIELD], "instance1");
        assert_eq!(doc[MIGRATED_AT_FIELD], "2024-05-01T08:00:00.000Z");
    }

    #[test]
    fn test_provenance_overrides_source_field() {
        let raw = RawRecord::new("u2", fields(json!({"source_partition": "forged"})));
        let record = UnifiedRecord::stamp(raw, "instance2", Utc::now());
        assert_eq!(record.document()[SOURCE_PARTITION_FIELD], "instance2");
    }

    #[test]
    fn test_provenance_counts() {
        let mut counts = ProvenanceCounts::default();
        counts.add(Some("instance1"), 3);
        counts.add(Some("instance1"), 2);
        counts.add(Some(""), 1);
        counts.add(None, 4);

        assert_eq!(counts.get("instance1"), 5);
        assert_eq!(counts.get("instance2"), 0);
        assert_eq!(counts.untagged, 5);
        assert_eq!(counts.total(), 10);
    }
}

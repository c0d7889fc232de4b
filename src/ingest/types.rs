// src/ingest/types.rs
use std::collections::BTreeMap;

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// A record exactly as returned upstream. No fixed schema.
pub type RawRecord = Value;

/// Columns computed by the processor. Flattened source fields with these
/// names are dropped in favor of the computed values.
pub const RESERVED_COLUMNS: [&str; 5] = [
    "id",
    "created_at",
    "processed_at",
    "data_quality_score",
    "is_complete",
];

pub const SCHEMA_VERSION: &str = "1.0.0";

/// A storage-ready record derived from exactly one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub id: String,
    pub created_at: String,
    pub processed_at: String,
    /// Flattened source fields, in upstream order. Never holds objects or arrays.
    pub fields: Map<String, Value>,
    pub data_quality_score: f64,
    pub is_complete: bool,
}

impl ProcessedRecord {
    /// The flat row as persisted: computed columns around the source fields.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::with_capacity(self.fields.len() + RESERVED_COLUMNS.len());
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("created_at".into(), Value::String(self.created_at.clone()));
        row.insert(
            "processed_at".into(),
            Value::String(self.processed_at.clone()),
        );
        for (k, v) in &self.fields {
            row.insert(k.clone(), v.clone());
        }
        row.insert(
            "data_quality_score".into(),
            serde_json::Number::from_f64(self.data_quality_score)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        row.insert("is_complete".into(), Value::Bool(self.is_complete));
        row
    }
}

impl Serialize for ProcessedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_row().serialize(serializer)
    }
}

/// Batch-level metadata attached to a write.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BatchMetadata {
    /// Caller-supplied entries (source, request id, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
    pub record_count: usize,
    pub processing_timestamp: String,
    pub schema_version: String,
}

impl BatchMetadata {
    /// All entries as `(key, value)` pairs, caller entries first.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.push(("record_count".into(), Value::from(self.record_count)));
        out.push((
            "processing_timestamp".into(),
            Value::String(self.processing_timestamp.clone()),
        ));
        out.push((
            "schema_version".into(),
            Value::String(self.schema_version.clone()),
        ));
        out
    }
}

/// What the orchestrator asks a source for on one invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub params: BTreeMap<String, String>,
    pub force_refresh: bool,
}

/// A place raw records come from.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError>;
    /// Identifier recorded as the batch's `source`.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_puts_computed_columns_around_fields() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ana"));
        fields.insert("address_city".into(), json!("Lima"));
        let rec = ProcessedRecord {
            id: "1".into(),
            created_at: "t0".into(),
            processed_at: "t1".into(),
            fields,
            data_quality_score: 1.0,
            is_complete: true,
        };
        let keys: Vec<String> = rec.to_row().keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "id",
                "created_at",
                "processed_at",
                "name",
                "address_city",
                "data_quality_score",
                "is_complete"
            ]
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["address_city"], "Lima");
        assert_eq!(v["data_quality_score"], 1.0);
    }

    #[test]
    fn metadata_serializes_flat() {
        let mut extra = BTreeMap::new();
        extra.insert("source".to_string(), json!("test"));
        let md = BatchMetadata {
            extra,
            record_count: 2,
            processing_timestamp: "now".into(),
            schema_version: SCHEMA_VERSION.into(),
        };
        let v = serde_json::to_value(&md).unwrap();
        assert_eq!(v["source"], "test");
        assert_eq!(v["record_count"], 2);
        assert_eq!(v["schema_version"], "1.0.0");
    }
}

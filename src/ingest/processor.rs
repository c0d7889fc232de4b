// src/ingest/processor.rs
//! Turns raw upstream records into flat, scored, storage-ready records.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use metrics::counter;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::RecordError;
use crate::ingest::client::json_type_name;
use crate::ingest::types::{BatchMetadata, ProcessedRecord, RawRecord, RESERVED_COLUMNS, SCHEMA_VERSION};

pub const DEFAULT_SEPARATOR: &str = "_";

#[derive(Debug, Clone)]
pub struct DataProcessor {
    separator: String,
    required_fields: Vec<String>,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            required_fields: vec!["id".to_string()],
        }
    }
}

impl DataProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(mut self, sep: impl Into<String>) -> Self {
        self.separator = sep.into();
        self
    }

    /// Fields that must be present, non-null and non-blank for `is_complete`.
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Process a batch. A record that fails is logged and skipped; records
    /// whose id was already seen in this batch are dropped.
    pub fn process(&self, raw: &[RawRecord]) -> Vec<ProcessedRecord> {
        let mut out = Vec::with_capacity(raw.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());
        let mut rejected = 0usize;
        let mut duplicates = 0usize;

        for record in raw {
            match self.process_record(record) {
                Ok(Some(rec)) => {
                    if seen.insert(rec.id.clone()) {
                        out.push(rec);
                    } else {
                        tracing::debug!(id = %rec.id, "duplicate id in batch, keeping first");
                        duplicates += 1;
                    }
                }
                Ok(None) => {
                    tracing::debug!("skipping empty record");
                    rejected += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, record = %record, "failed to process record");
                    rejected += 1;
                }
            }
        }

        counter!("records_processed_total").increment(out.len() as u64);
        counter!("records_rejected_total").increment(rejected as u64);
        counter!("records_duplicate_total").increment(duplicates as u64);
        tracing::info!(
            processed = out.len(),
            attempted = raw.len(),
            duplicates,
            "successfully processed {}/{} records",
            out.len(),
            raw.len()
        );
        out
    }

    /// `Ok(None)` for an empty object: there is nothing to store.
    pub fn process_record(&self, record: &RawRecord) -> Result<Option<ProcessedRecord>, RecordError> {
        let obj = record
            .as_object()
            .ok_or_else(|| RecordError::NotAnObject(json_type_name(record)))?;
        if obj.is_empty() {
            return Ok(None);
        }

        // a blank id would collide with every other blank id in the batch
        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            None | Some(Value::Null) | Some(Value::String(_)) => generate_id(record),
            Some(other) => other.to_string(),
        };

        let mut fields = flatten(obj, &self.separator);
        fields.retain(|k, _| !RESERVED_COLUMNS.contains(&k.as_str()));

        let now = Utc::now().to_rfc3339();
        Ok(Some(ProcessedRecord {
            id,
            created_at: now.clone(),
            processed_at: now,
            fields,
            data_quality_score: quality_score(obj),
            is_complete: self.is_complete(obj),
        }))
    }

    fn is_complete(&self, obj: &Map<String, Value>) -> bool {
        self.required_fields
            .iter()
            .all(|f| obj.get(f).is_some_and(is_filled))
    }

    /// Merge caller metadata with the computed batch fields. Computed fields win.
    pub fn add_metadata(
        &self,
        records: &[ProcessedRecord],
        extra: BTreeMap<String, Value>,
    ) -> BatchMetadata {
        let mut extra = extra;
        for reserved in ["record_count", "processing_timestamp", "schema_version"] {
            extra.remove(reserved);
        }
        BatchMetadata {
            extra,
            record_count: records.len(),
            processing_timestamp: Utc::now().to_rfc3339(),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// Present and meaningful: not null and not a blank string.
fn is_filled(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Depth-first flatten: nested objects merge into the parent as
/// `parent{sep}child`, arrays are kept whole as compact JSON strings.
pub fn flatten(obj: &Map<String, Value>, sep: &str) -> Map<String, Value> {
    let mut out = Map::with_capacity(obj.len());
    flatten_into(obj, "", sep, &mut out);
    out
}

fn flatten_into(obj: &Map<String, Value>, parent: &str, sep: &str, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let name = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}{sep}{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &name, sep, out),
            Value::Array(_) => {
                out.insert(name, Value::String(value.to_string()));
            }
            scalar => {
                out.insert(name, scalar.clone());
            }
        }
    }
}

/// Share of filled top-level fields (not null, not ""), rounded to 2 places.
pub fn quality_score(obj: &Map<String, Value>) -> f64 {
    let total = obj.len();
    if total == 0 {
        return 0.0;
    }
    let filled = obj
        .values()
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .count();
    ((filled as f64 / total as f64) * 100.0).round() / 100.0
}

/// Stable content hash of a record: SHA-256 over its key-sorted JSON form.
pub fn generate_id(record: &RawRecord) -> String {
    let digest = Sha256::digest(canonical_json(record).as_bytes());
    format!("{digest:x}")
}

/// JSON rendering with object keys sorted at every level.
pub fn canonical_json(v: &Value) -> String {
    fn sorted(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                let mut out = Map::with_capacity(ordered.len());
                for (k, v) in ordered {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(v).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn example_batch_processes_cleanly() {
        let p = DataProcessor::new();
        let raw = vec![json!({"id": 1, "name": "Ana"}), json!({"id": 2, "name": "Luis"})];
        let out = p.process(&raw);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "1");
        assert_eq!(out[1].id, "2");
        for rec in &out {
            assert!(!rec.processed_at.is_empty());
            assert!(!rec.created_at.is_empty());
            assert_eq!(rec.data_quality_score, 1.0);
            assert!(rec.is_complete);
        }

        let mut extra = BTreeMap::new();
        extra.insert("source".to_string(), json!("test"));
        let md = serde_json::to_value(p.add_metadata(&out, extra)).unwrap();
        assert_eq!(md["record_count"], 2);
        assert_eq!(md["source"], "test");
        assert_eq!(md["schema_version"], SCHEMA_VERSION);
    }

    #[test]
    fn nested_objects_flatten_and_arrays_serialize() {
        let raw = obj(json!({
            "user": {"name": "Ana", "address": {"city": "Lima", "geo": {"lat": 1.5}}},
            "tags": ["a", "b"],
            "n": 3
        }));
        let flat = flatten(&raw, "_");
        assert_eq!(flat["user_name"], "Ana");
        assert_eq!(flat["user_address_city"], "Lima");
        assert_eq!(flat["user_address_geo_lat"], 1.5);
        assert_eq!(flat["tags"], r#"["a","b"]"#);
        assert_eq!(flat["n"], 3);
        assert!(flat.values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    fn custom_separator_is_used() {
        let flat = flatten(&obj(json!({"a": {"b": 1}})), ".");
        assert_eq!(flat["a.b"], 1);
    }

    #[test]
    fn processed_fields_have_no_containers() {
        let p = DataProcessor::new();
        let out = p.process(&[json!({"id": "x", "meta": {"deep": {"er": [1, {"k": 2}]}}})]);
        assert_eq!(out.len(), 1);
        assert!(out[0]
            .to_row()
            .values()
            .all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    fn quality_score_bounds() {
        assert_eq!(quality_score(&Map::new()), 0.0);
        assert_eq!(quality_score(&obj(json!({"a": 1, "b": null, "c": ""}))), 0.33);
        assert_eq!(quality_score(&obj(json!({"a": null}))), 0.0);
        assert_eq!(quality_score(&obj(json!({"a": 0, "b": false}))), 1.0);
        let s = quality_score(&obj(json!({"a": 1, "b": null})));
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn score_uses_unflattened_field_count() {
        let p = DataProcessor::new();
        // two top-level fields, one filled: nested contents do not count separately
        let rec = p
            .process_record(&json!({"id": 5, "profile": null}))
            .unwrap()
            .unwrap();
        assert_eq!(rec.data_quality_score, 0.5);
    }

    #[test]
    fn missing_id_gets_stable_hash() {
        let a = json!({"name": "Ana", "age": 30});
        let b = json!({"age": 30, "name": "Ana"});
        assert_eq!(generate_id(&a), generate_id(&a));
        assert_eq!(generate_id(&a), generate_id(&b));
        assert_ne!(generate_id(&a), generate_id(&json!({"name": "Luis"})));

        let p = DataProcessor::new();
        let rec = p.process_record(&a).unwrap().unwrap();
        assert_eq!(rec.id, generate_id(&a));
        assert_eq!(rec.id.len(), 64);
        assert!(!rec.is_complete);
    }

    #[test]
    fn null_id_falls_back_to_hash() {
        let p = DataProcessor::new();
        let raw = json!({"id": null, "name": "Ana"});
        let rec = p.process_record(&raw).unwrap().unwrap();
        assert_eq!(rec.id, generate_id(&raw));
    }

    #[test]
    fn blank_ids_fall_back_to_hash_and_keep_distinct_records() {
        let p = DataProcessor::new();
        let raw = vec![
            json!({"id": "", "name": "Ana"}),
            json!({"id": "  ", "name": "Luis"}),
            json!({"id": "", "name": "Eva"}),
        ];
        let out = p.process(&raw);
        assert_eq!(out.len(), 3);
        for (rec, src) in out.iter().zip(&raw) {
            assert_eq!(rec.id, generate_id(src));
            assert!(!rec.id.trim().is_empty());
            assert!(!rec.is_complete);
        }
    }

    #[test]
    fn string_ids_are_kept_verbatim() {
        let p = DataProcessor::new();
        let rec = p.process_record(&json!({"id": "abc-1"})).unwrap().unwrap();
        assert_eq!(rec.id, "abc-1");
        assert_eq!(rec.to_row()["id"], "abc-1");
    }

    #[test]
    fn bad_records_are_skipped_not_fatal() {
        let p = DataProcessor::new();
        let raw = vec![json!(42), json!({"id": 1}), json!({}), json!("x"), json!({"id": 2})];
        let out = p.process(&raw);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(
            p.process_record(&json!([1])),
            Err(RecordError::NotAnObject("array"))
        );
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let p = DataProcessor::new();
        let out = p.process(&[
            json!({"id": 1, "v": "first"}),
            json!({"id": "1", "v": "second"}),
            json!({"id": 2}),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].fields["v"], "first");
    }

    #[test]
    fn required_fields_are_configurable() {
        let p = DataProcessor::new().with_required_fields(["id", "email"]);
        let rec = p
            .process_record(&json!({"id": 1, "email": null}))
            .unwrap()
            .unwrap();
        assert!(!rec.is_complete);
        let rec = p
            .process_record(&json!({"id": 1, "email": "a@b.c"}))
            .unwrap()
            .unwrap();
        assert!(rec.is_complete);
    }

    #[test]
    fn computed_columns_win_over_source_fields() {
        let p = DataProcessor::new();
        let rec = p
            .process_record(&json!({"id": 9, "processed_at": "yesterday", "x": 1}))
            .unwrap()
            .unwrap();
        assert!(!rec.fields.contains_key("processed_at"));
        assert!(!rec.fields.contains_key("id"));
        assert_ne!(rec.to_row()["processed_at"], "yesterday");
    }

    #[test]
    fn caller_cannot_override_computed_metadata() {
        let p = DataProcessor::new();
        let mut extra = BTreeMap::new();
        extra.insert("record_count".to_string(), json!(999));
        let md = p.add_metadata(&[], extra);
        assert_eq!(md.record_count, 0);
        assert!(md.extra.is_empty());
    }
}

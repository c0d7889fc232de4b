// src/ingest/quality.rs
//! Batch-level quality checks over processed records.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ingest::client::json_type_name;
use crate::ingest::types::ProcessedRecord;

/// Percentage (0–100) of required fields that are filled across the batch.
pub fn completeness_pct(records: &[ProcessedRecord], required: &[&str]) -> f64 {
    let total = records.len() * required.len();
    if total == 0 {
        return 0.0;
    }
    let filled: usize = records
        .iter()
        .map(|r| {
            let row = r.to_row();
            required
                .iter()
                .filter(|f| {
                    row.get(**f)
                        .is_some_and(|v| !v.is_null() && v.as_str() != Some(""))
                })
                .count()
        })
        .sum();
    filled as f64 / total as f64 * 100.0
}

/// Field → type name map sampled from the first record.
pub fn infer_schema(records: &[ProcessedRecord]) -> BTreeMap<String, String> {
    records
        .first()
        .map(|r| {
            r.to_row()
                .iter()
                .map(|(k, v)| (k.clone(), json_type_name(v).to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Short quality summary stored with the batch metadata.
pub fn summary(records: &[ProcessedRecord]) -> BTreeMap<String, Value> {
    let mean_score = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.data_quality_score).sum::<f64>() / records.len() as f64
    };
    let complete = records.iter().filter(|r| r.is_complete).count();

    let mut out = BTreeMap::new();
    out.insert(
        "mean_quality_score".to_string(),
        Value::from((mean_score * 100.0).round() / 100.0),
    );
    out.insert("complete_records".to_string(), Value::from(complete));
    out
}

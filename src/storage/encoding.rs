// src/storage/encoding.rs
//! Batch encoders: JSON document, CSV table, Parquet columns.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::ingest::types::ProcessedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Csv,
    Parquet,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Csv => "csv",
            Encoding::Parquet => "parquet",
        }
    }

    pub fn extension(self) -> &'static str {
        self.name()
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Csv => "text/csv",
            Encoding::Parquet => "application/vnd.apache.parquet",
        }
    }

    pub fn encode(self, records: &[ProcessedRecord]) -> Result<Vec<u8>, StorageError> {
        let rows: Vec<Map<String, Value>> = records.iter().map(ProcessedRecord::to_row).collect();
        match self {
            Encoding::Json => to_json(&rows),
            Encoding::Csv => Ok(to_csv(&rows)),
            Encoding::Parquet => to_parquet(&rows),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "csv" => Ok(Encoding::Csv),
            "parquet" => Ok(Encoding::Parquet),
            _ => Err(StorageError::UnsupportedEncoding(s.to_string())),
        }
    }
}

fn to_json(rows: &[Map<String, Value>]) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(rows).map_err(|e| StorageError::Encode {
        encoding: "json",
        reason: e.to_string(),
    })
}

/// Text form of a scalar cell: strings unquoted, null empty.
pub fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Header comes from the first row only; later rows are aligned to it and
/// fields outside it are not written.
fn to_csv(rows: &[Map<String, Value>]) -> Vec<u8> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let headers: Vec<&String> = first.keys().collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        headers
            .iter()
            .map(|h| csv_escape(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in rows {
        let line = headers
            .iter()
            .map(|h| csv_escape(&row.get(*h).map(cell_text).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n").into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl ColumnKind {
    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Utf8 => DataType::Utf8,
        }
    }
}

/// Narrowest type that holds every non-null value of the column.
fn column_kind<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for v in values {
        let this = match v {
            Value::Null => continue,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Number(n) if n.is_i64() => ColumnKind::Int64,
            Value::Number(_) => ColumnKind::Float64,
            _ => ColumnKind::Utf8,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int64), ColumnKind::Float64)
            | (Some(ColumnKind::Float64), ColumnKind::Int64) => ColumnKind::Float64,
            _ => return ColumnKind::Utf8,
        });
    }
    kind.unwrap_or(ColumnKind::Utf8)
}

/// Computed columns every processed record carries; used as the schema of an
/// empty batch.
fn base_columns() -> Vec<(String, ColumnKind)> {
    vec![
        ("id".into(), ColumnKind::Utf8),
        ("created_at".into(), ColumnKind::Utf8),
        ("processed_at".into(), ColumnKind::Utf8),
        ("data_quality_score".into(), ColumnKind::Float64),
        ("is_complete".into(), ColumnKind::Boolean),
    ]
}

fn to_parquet(rows: &[Map<String, Value>]) -> Result<Vec<u8>, StorageError> {
    let encode_err = |reason: String| StorageError::Encode {
        encoding: "parquet",
        reason,
    };

    // Union of columns in first-seen order.
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        for k in row.keys() {
            if !names.iter().any(|n| n == k) {
                names.push(k.clone());
            }
        }
    }
    let columns: Vec<(String, ColumnKind)> = if names.is_empty() {
        base_columns()
    } else {
        names
            .into_iter()
            .map(|name| {
                let kind = column_kind(rows.iter().filter_map(|r| r.get(&name)));
                (name, kind)
            })
            .collect()
    };

    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, kind)| Field::new(name.as_str(), kind.data_type(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(name, kind)| build_array(rows, name, *kind))
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(|e| encode_err(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| encode_err(e.to_string()))?;
    writer.write(&batch).map_err(|e| encode_err(e.to_string()))?;
    writer.close().map_err(|e| encode_err(e.to_string()))?;
    Ok(buf)
}

fn build_array(rows: &[Map<String, Value>], name: &str, kind: ColumnKind) -> ArrayRef {
    let cells = rows.iter().map(|r| r.get(name).filter(|v| !v.is_null()));
    match kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(
            cells.map(|v| v.and_then(Value::as_bool)).collect::<Vec<_>>(),
        )),
        ColumnKind::Int64 => Arc::new(Int64Array::from(
            cells.map(|v| v.and_then(Value::as_i64)).collect::<Vec<_>>(),
        )),
        ColumnKind::Float64 => Arc::new(Float64Array::from(
            cells.map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
        )),
        ColumnKind::Utf8 => Arc::new(StringArray::from(
            cells.map(|v| v.map(cell_text)).collect::<Vec<_>>(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: Value) -> Vec<Map<String, Value>> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn parse_is_case_insensitive_and_strict() {
        assert_eq!("JSON".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!(" parquet ".parse::<Encoding>().unwrap(), Encoding::Parquet);
        assert!(matches!(
            "avro".parse::<Encoding>(),
            Err(StorageError::UnsupportedEncoding(ref s)) if s == "avro"
        ));
    }

    #[test]
    fn csv_header_comes_from_first_row() {
        let out = to_csv(&rows(json!([
            {"id": "1", "name": "Ana", "age": 30},
            {"id": "2", "age": null, "extra": "dropped"},
        ])));
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "id,name,age\n1,Ana,30\n2,,");
    }

    #[test]
    fn csv_quotes_special_characters() {
        let out = to_csv(&rows(json!([{"note": "a,b", "q": "say \"hi\""}])));
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "note,q\n\"a,b\",\"say \"\"hi\"\"\"");
    }

    #[test]
    fn empty_csv_is_empty() {
        assert!(to_csv(&[]).is_empty());
    }

    #[test]
    fn column_kinds_widen() {
        let vals = [json!(1), json!(null), json!(2)];
        assert_eq!(column_kind(vals.iter()), ColumnKind::Int64);
        let vals = [json!(1), json!(2.5)];
        assert_eq!(column_kind(vals.iter()), ColumnKind::Float64);
        let vals = [json!(true), json!(1)];
        assert_eq!(column_kind(vals.iter()), ColumnKind::Utf8);
        let vals = [json!(null)];
        assert_eq!(column_kind(vals.iter()), ColumnKind::Utf8);
    }

    #[test]
    fn parquet_output_is_a_parquet_file() {
        let out = to_parquet(&rows(json!([
            {"id": "1", "n": 1, "score": 0.5, "ok": true},
            {"id": "2", "n": null, "score": 1, "ok": false, "late": "x"},
        ])))
        .unwrap();
        assert!(out.len() > 8);
        assert_eq!(&out[..4], b"PAR1");
        assert_eq!(&out[out.len() - 4..], b"PAR1");
    }

    #[test]
    fn empty_parquet_batch_still_encodes() {
        let out = to_parquet(&[]).unwrap();
        assert_eq!(&out[..4], b"PAR1");
    }
}

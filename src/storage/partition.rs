// src/storage/partition.rs
use std::fmt;

use chrono::{DateTime, Datelike, Utc};

/// Root prefix for freshly extracted data.
pub const RAW_DATA_PREFIX: &str = "raw-data";

/// Hive-style date partition: `year=YYYY/month=MM/day=DD` (UTC).
pub fn partition_path(now: DateTime<Utc>) -> String {
    format!(
        "year={}/month={:02}/day={:02}",
        now.year(),
        now.month(),
        now.day()
    )
}

/// `raw-data/year=.../month=.../day=...`
pub fn raw_data_prefix(now: DateTime<Utc>) -> String {
    format!("{RAW_DATA_PREFIX}/{}", partition_path(now))
}

/// `scheme://bucket/key`, as reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(scheme: &str, bucket: &str, key: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

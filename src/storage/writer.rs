// src/storage/writer.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;

use crate::error::{StorageError, StoreError};
use crate::ingest::quality::infer_schema;
use crate::ingest::types::{BatchMetadata, ProcessedRecord};
use crate::storage::encoding::{cell_text, Encoding};
use crate::storage::store::{ObjectStore, PutObject};

/// Backend limit on a single tag: `key.len() + value.len()` must stay below this.
pub const MAX_TAG_LEN: usize = 1024;
pub const SERVER_SIDE_ENCRYPTION: &str = "AES256";
pub const METADATA_SUFFIX: &str = ".metadata.json";

/// Gives up finding a free key after this many collisions in one second.
const MAX_KEY_ATTEMPTS: u32 = 1000;

/// Companion document stored next to each data object.
#[derive(Debug, Clone, Serialize)]
pub struct SidecarMetadata {
    pub data_file: String,
    pub created_at: String,
    pub record_count: usize,
    pub schema: BTreeMap<String, String>,
    /// Batch metadata entries; `{}` when the write carried none.
    pub custom_metadata: BTreeMap<String, Value>,
}

pub struct ObjectWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectWriter {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Encode and store `records` under `prefix`, returning the data key.
    pub async fn write(
        &self,
        records: &[ProcessedRecord],
        prefix: &str,
        encoding: &str,
        metadata: Option<&BatchMetadata>,
    ) -> Result<String, StorageError> {
        self.write_at(records, prefix, encoding, metadata, Utc::now())
            .await
    }

    /// `write` with an explicit clock.
    pub async fn write_at(
        &self,
        records: &[ProcessedRecord],
        prefix: &str,
        encoding: &str,
        metadata: Option<&BatchMetadata>,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        // Reject before touching the store.
        let encoding: Encoding = encoding.parse()?;
        let body = encoding.encode(records)?;
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();

        let object = PutObject {
            body,
            content_type: encoding.content_type().to_string(),
            tags: build_tags(records.len(), encoding, &timestamp, metadata),
            server_side_encryption: Some(SERVER_SIDE_ENCRYPTION.to_string()),
        };

        let key = self.put_unique(prefix, &timestamp, encoding, object).await?;
        counter!("objects_written_total", "format" => encoding.name()).increment(1);
        tracing::info!(
            records = records.len(),
            bucket = %self.bucket,
            %key,
            "successfully wrote records"
        );

        self.write_sidecar(&key, records, metadata, now).await;
        Ok(key)
    }

    /// Create-only put; on a taken key retry with a numeric suffix.
    async fn put_unique(
        &self,
        prefix: &str,
        timestamp: &str,
        encoding: Encoding,
        object: PutObject,
    ) -> Result<String, StorageError> {
        let prefix = prefix.trim_end_matches('/');
        for n in 0..MAX_KEY_ATTEMPTS {
            let key = data_key(prefix, timestamp, n, encoding);
            match self.store.put(&self.bucket, &key, object.clone()).await {
                Ok(()) => return Ok(key),
                Err(StoreError::AlreadyExists { .. }) => {
                    tracing::debug!(%key, "key taken, trying next suffix");
                }
                Err(e) => {
                    tracing::error!(bucket = %self.bucket, %key, error = %e, "failed to write object");
                    return Err(e.into());
                }
            }
        }
        Err(StoreError::Backend(format!(
            "no free key under {prefix} for timestamp {timestamp}"
        ))
        .into())
    }

    /// Best-effort: a failure here is logged and never fails the write.
    async fn write_sidecar(
        &self,
        data_key: &str,
        records: &[ProcessedRecord],
        metadata: Option<&BatchMetadata>,
        now: DateTime<Utc>,
    ) {
        let key = format!("{data_key}{METADATA_SUFFIX}");
        let doc = SidecarMetadata {
            data_file: data_key.to_string(),
            created_at: now.to_rfc3339(),
            record_count: records.len(),
            schema: infer_schema(records),
            custom_metadata: metadata
                .map(|md| md.entries().into_iter().collect())
                .unwrap_or_default(),
        };

        let body = match serde_json::to_vec_pretty(&doc) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to serialize metadata file");
                counter!("metadata_write_failures_total").increment(1);
                return;
            }
        };
        let object = PutObject {
            body,
            content_type: "application/json".to_string(),
            tags: BTreeMap::new(),
            server_side_encryption: Some(SERVER_SIDE_ENCRYPTION.to_string()),
        };

        match self.store.put(&self.bucket, &key, object).await {
            Ok(()) => tracing::info!(%key, "metadata written"),
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to write metadata file");
                counter!("metadata_write_failures_total").increment(1);
            }
        }
    }
}

/// `{prefix}/data_{timestamp}.{ext}`, or `data_{timestamp}_{n}.{ext}` for n > 0.
pub fn data_key(prefix: &str, timestamp: &str, n: u32, encoding: Encoding) -> String {
    let stem = if n == 0 {
        format!("data_{timestamp}")
    } else {
        format!("data_{timestamp}_{n}")
    };
    let file = format!("{stem}.{}", encoding.extension());
    if prefix.is_empty() {
        file
    } else {
        format!("{prefix}/{file}")
    }
}

/// Object tags: fixed entries plus metadata entries that fit the backend limit.
pub fn build_tags(
    record_count: usize,
    encoding: Encoding,
    timestamp: &str,
    metadata: Option<&BatchMetadata>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("record_count".to_string(), record_count.to_string());
    tags.insert("format".to_string(), encoding.name().to_string());
    tags.insert("timestamp".to_string(), timestamp.to_string());

    if let Some(md) = metadata {
        for (key, value) in md.entries() {
            let value = match &value {
                Value::String(_) | Value::Null => cell_text(&value),
                other => other.to_string(),
            };
            if key.len() + value.len() < MAX_TAG_LEN {
                tags.insert(key.replace(' ', "_").to_lowercase(), value);
            }
        }
    }
    tags
}

// src/error.rs
//! Error taxonomy for the extraction pipeline.
//!
//! Stage-level errors (`FetchError`, `StorageError`, `ConfigError`) abort the
//! current invocation and surface as a structured failure. `RecordError` stays
//! inside the processor: the record is logged and skipped.

use thiserror::Error;

/// Missing or malformed configuration. Fatal for the invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failures while pulling records from the upstream API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network, connect or timeout fault. Retryable.
    #[error("transport error talking to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status. Retryable only for 5xx and 429.
    #[error("upstream returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    /// Body is not parseable as JSON. Never retried.
    #[error("response from {url} is not valid JSON: {source}")]
    Format {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid endpoint url {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Format { .. } | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Why a single raw record could not be processed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

/// Object store backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {bucket}/{key} already exists")]
    AlreadyExists { bucket: String, key: String },
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures of the object writer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported encoding {0:?} (expected json, csv or parquet)")]
    UnsupportedEncoding(String),
    #[error("failed to encode batch as {encoding}: {reason}")]
    Encode {
        encoding: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Any stage-level failure of one invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Short machine-readable tag surfaced in failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "configuration",
            PipelineError::Fetch(FetchError::Format { .. }) => "format",
            PipelineError::Fetch(_) => "transport",
            PipelineError::Storage(StorageError::UnsupportedEncoding(_)) => "unsupported_encoding",
            PipelineError::Storage(StorageError::Encode { .. }) => "encode",
            PipelineError::Storage(StorageError::Store(_)) => "storage",
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transience_follows_http_class() {
        let s = |status| FetchError::Status {
            status,
            url: "http://x".into(),
        };
        assert!(s(503).is_transient());
        assert!(s(429).is_transient());
        assert!(!s(404).is_transient());
        assert!(!s(400).is_transient());
    }

    #[test]
    fn kinds_are_tagged() {
        let e = PipelineError::from(ConfigError::Missing("DATA_BUCKET_NAME"));
        assert_eq!(e.kind(), "configuration");
        assert!(e.is_configuration());

        let e = PipelineError::from(StorageError::UnsupportedEncoding("avro".into()));
        assert_eq!(e.kind(), "unsupported_encoding");
        assert!(!e.is_configuration());
    }
}

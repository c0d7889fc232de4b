// src/handler.rs
//! Extraction orchestrator: one invocation runs fetch, process and write in
//! sequence and always ends in a structured response.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::config::{PipelineConfig, ENV_ENDPOINT};
use crate::error::{ConfigError, FetchError, PipelineError};
use crate::ingest::client::ApiClient;
use crate::ingest::processor::DataProcessor;
use crate::ingest::quality;
use crate::ingest::types::{FetchRequest, RecordSource};
use crate::metrics::{ensure_described, timed};
use crate::storage::{raw_data_prefix, ObjectLocation, ObjectStore, ObjectWriter};

pub const MSG_SUCCESS: &str = "Data extraction completed successfully";
pub const MSG_NO_DATA: &str = "No data to process";

/// Per-invocation overrides. Both fields are optional in the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationEvent {
    #[serde(alias = "forceRefresh")]
    pub force_refresh: bool,
    #[serde(alias = "apiParams")]
    pub api_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub records_processed: usize,
    pub location: String,
    pub encoding: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RunDetails>,
    /// Error-kind tag, e.g. `configuration` or `transport`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: ResponseBody,
}

impl InvocationResponse {
    pub fn success(details: RunDetails) -> Self {
        Self {
            status_code: 200,
            body: ResponseBody {
                message: MSG_SUCCESS.to_string(),
                details: Some(details),
                error: None,
            },
        }
    }

    pub fn no_data() -> Self {
        Self {
            status_code: 204,
            body: ResponseBody {
                message: MSG_NO_DATA.to_string(),
                details: None,
                error: None,
            },
        }
    }

    pub fn failure(err: &PipelineError) -> Self {
        let message = match err {
            PipelineError::Config(e) => format!("Configuration error: {e}"),
            other => format!("Processing failed: {other}"),
        };
        Self {
            status_code: 500,
            body: ResponseBody {
                message,
                details: None,
                error: Some(err.kind().to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Missing or malformed setting.
    Configuration,
    /// Transport, format, encoding or storage fault.
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    Processing,
    Writing,
    Succeeded,
    Failed(FailureKind),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => f.write_str("idle"),
            Stage::Fetching => f.write_str("fetching"),
            Stage::Processing => f.write_str("processing"),
            Stage::Writing => f.write_str("writing"),
            Stage::Succeeded => f.write_str("succeeded"),
            Stage::Failed(FailureKind::Configuration) => f.write_str("failed(configuration)"),
            Stage::Failed(FailureKind::Runtime) => f.write_str("failed(runtime)"),
        }
    }
}

/// Final state of one invocation plus the response handed to the caller.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub stage: Stage,
    pub response: InvocationResponse,
}

fn transition(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

pub struct Orchestrator {
    source: Arc<dyn RecordSource>,
    processor: DataProcessor,
    writer: ObjectWriter,
    scheme: &'static str,
    output_format: String,
    environment: String,
    clock: fn() -> DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        cfg: &PipelineConfig,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let scheme = store.scheme();
        Self {
            source,
            processor: DataProcessor::new(),
            writer: ObjectWriter::new(store, cfg.bucket.clone()),
            scheme,
            output_format: cfg.output_format.clone(),
            environment: cfg.environment.clone(),
            clock: Utc::now,
        }
    }

    /// Time source for the write stage's partition and key.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_processor(mut self, processor: DataProcessor) -> Self {
        self.processor = processor;
        self
    }

    /// Run one invocation. Never retries at this level.
    pub async fn run(&self, event: &InvocationEvent, correlation_id: &str) -> Outcome {
        ensure_described();
        let span = tracing::info_span!("extract", correlation_id = %correlation_id);

        let mut stage = Stage::Idle;
        let result = self
            .execute(event, correlation_id, &mut stage)
            .instrument(span)
            .await;

        match result {
            Ok(Some(details)) => {
                transition(&mut stage, Stage::Succeeded);
                gauge!("pipeline_last_success_ts").set(Utc::now().timestamp() as f64);
                tracing::info!(
                    %correlation_id,
                    records = details.records_processed,
                    location = %details.location,
                    "extraction succeeded"
                );
                Outcome {
                    stage,
                    response: InvocationResponse::success(details),
                }
            }
            Ok(None) => {
                transition(&mut stage, Stage::Succeeded);
                gauge!("pipeline_last_success_ts").set(Utc::now().timestamp() as f64);
                Outcome {
                    stage,
                    response: InvocationResponse::no_data(),
                }
            }
            Err(e) => {
                let kind = if e.is_configuration() {
                    FailureKind::Configuration
                } else {
                    FailureKind::Runtime
                };
                tracing::error!(%correlation_id, stage = %stage, kind = e.kind(), error = %e, "extraction failed");
                transition(&mut stage, Stage::Failed(kind));
                Outcome {
                    stage,
                    response: InvocationResponse::failure(&e),
                }
            }
        }
    }

    /// `Ok(None)` means the run found nothing to store.
    async fn execute(
        &self,
        event: &InvocationEvent,
        correlation_id: &str,
        stage: &mut Stage,
    ) -> Result<Option<RunDetails>, PipelineError> {
        transition(stage, Stage::Fetching);
        let request = FetchRequest {
            params: event.api_params.clone(),
            force_refresh: event.force_refresh,
        };
        let raw = timed("fetch", self.source.fetch_records(&request)).await?;
        if raw.is_empty() {
            tracing::warn!(source = %self.source.describe(), "no data received from source");
            return Ok(None);
        }
        tracing::info!(records = raw.len(), "fetched records from source");

        transition(stage, Stage::Processing);
        let processed = timed("process", async {
            Ok::<_, PipelineError>(self.processor.process(&raw))
        })
        .await?;
        if processed.is_empty() {
            tracing::warn!(attempted = raw.len(), "no record survived processing");
            return Ok(None);
        }

        let required: Vec<&str> = self
            .processor
            .required_fields()
            .iter()
            .map(String::as_str)
            .collect();
        let completeness = quality::completeness_pct(&processed, &required);

        let mut extra: BTreeMap<String, Value> = quality::summary(&processed);
        extra.insert("source".into(), Value::String(self.source.describe()));
        extra.insert(
            "extraction_time".into(),
            Value::String(Utc::now().to_rfc3339()),
        );
        extra.insert("request_id".into(), Value::String(correlation_id.to_string()));
        extra.insert("force_refresh".into(), Value::Bool(event.force_refresh));
        extra.insert(
            "environment".into(),
            Value::String(self.environment.clone()),
        );
        extra.insert(
            "completeness_pct".into(),
            Value::from((completeness * 100.0).round() / 100.0),
        );
        let metadata = self.processor.add_metadata(&processed, extra);

        transition(stage, Stage::Writing);
        // one instant for both the partition and the key timestamp
        let now = (self.clock)();
        let prefix = raw_data_prefix(now);
        let key = timed(
            "write",
            self.writer.write_at(
                &processed,
                &prefix,
                &self.output_format,
                Some(&metadata),
                now,
            ),
        )
        .await?;

        let location = ObjectLocation::new(self.scheme, self.writer.bucket(), &key);
        Ok(Some(RunDetails {
            records_processed: processed.len(),
            location: location.to_string(),
            encoding: self.output_format.clone(),
            correlation_id: correlation_id.to_string(),
        }))
    }
}

/// Entry point for one invocation: resolve configuration, build the API
/// client and run the orchestrator. Configuration faults become a `500`
/// response, never a panic.
pub async fn handle(
    event: &InvocationEvent,
    config: Result<PipelineConfig, ConfigError>,
    store: Arc<dyn ObjectStore>,
    correlation_id: &str,
) -> InvocationResponse {
    let cfg = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%correlation_id, error = %e, "missing required configuration");
            return InvocationResponse::failure(&PipelineError::from(e));
        }
    };

    let client = match ApiClient::from_config(&cfg) {
        Ok(client) => client,
        Err(FetchError::InvalidUrl(reason)) => {
            let e = PipelineError::from(ConfigError::Invalid {
                name: ENV_ENDPOINT,
                reason,
            });
            tracing::error!(%correlation_id, error = %e, "invalid source endpoint");
            return InvocationResponse::failure(&e);
        }
        Err(e) => {
            tracing::error!(%correlation_id, error = %e, "failed to build API client");
            return InvocationResponse::failure(&PipelineError::from(e));
        }
    };

    tracing::info!(
        %correlation_id,
        endpoint = %cfg.endpoint,
        bucket = %cfg.bucket,
        format = %cfg.output_format,
        environment = %cfg.environment,
        "starting data extraction"
    );
    Orchestrator::new(&cfg, Arc::new(client), store)
        .run(event, correlation_id)
        .await
        .response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use serde_json::json;

    #[test]
    fn event_accepts_both_key_styles() {
        let a: InvocationEvent =
            serde_json::from_value(json!({"force_refresh": true, "api_params": {"q": "x"}}))
                .unwrap();
        let b: InvocationEvent =
            serde_json::from_value(json!({"forceRefresh": true, "apiParams": {"q": "x"}}))
                .unwrap();
        assert_eq!(a, b);
        assert!(a.force_refresh);
        let empty: InvocationEvent = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, InvocationEvent::default());
    }

    #[test]
    fn success_response_uses_camel_case_details() {
        let resp = InvocationResponse::success(RunDetails {
            records_processed: 2,
            location: "s3://b/k".into(),
            encoding: "json".into(),
            correlation_id: "abc".into(),
        });
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["statusCode"], 200);
        assert_eq!(v["body"]["message"], MSG_SUCCESS);
        assert_eq!(v["body"]["details"]["recordsProcessed"], 2);
        assert_eq!(v["body"]["details"]["correlationId"], "abc");
        assert!(v["body"].get("error").is_none());
    }

    #[test]
    fn failure_carries_kind_tag() {
        let e = PipelineError::from(StorageError::UnsupportedEncoding("avro".into()));
        let resp = InvocationResponse::failure(&e);
        assert_eq!(resp.status_code, 500);
        assert_eq!(resp.body.error.as_deref(), Some("unsupported_encoding"));
        assert!(resp.body.message.starts_with("Processing failed"));
        assert!(!resp.is_success());

        let e = PipelineError::from(ConfigError::Missing("DATA_BUCKET_NAME"));
        let resp = InvocationResponse::failure(&e);
        assert!(resp.body.message.starts_with("Configuration error"));
        assert_eq!(resp.body.error.as_deref(), Some("configuration"));
    }

    #[tokio::test]
    async fn missing_config_is_a_500_without_io() {
        let store = Arc::new(crate::storage::MemoryStore::new());
        let resp = handle(
            &InvocationEvent::default(),
            Err(ConfigError::Missing("DATA_BUCKET_NAME")),
            store.clone(),
            "cid",
        )
        .await;
        assert_eq!(resp.status_code, 500);
        assert!(store.list("", "").await.unwrap().is_empty());
    }
}

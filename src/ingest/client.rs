// src/ingest/client.rs
//! HTTP client for the upstream JSON API.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use serde_json::Value;

use crate::config::{PaginationSettings, PipelineConfig};
use crate::error::FetchError;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{FetchRequest, RawRecord, RecordSource};

/// Wrapper keys checked, in priority order, when the payload is an object.
pub const WRAPPER_KEYS: [&str; 3] = ["data", "results", "items"];

const USER_AGENT: &str = concat!("extract-pipeline/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);

/// Shape of a decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    List(Vec<Value>),
    Wrapper { key: &'static str, records: Vec<Value> },
    SingleObject(serde_json::Map<String, Value>),
    Unrecognized { type_name: &'static str },
}

impl Payload {
    pub fn classify(body: Value) -> Self {
        match body {
            Value::Array(items) => Payload::List(items),
            Value::Object(mut map) => {
                for key in WRAPPER_KEYS {
                    let Some(inner) = map.remove(key) else {
                        continue;
                    };
                    return match inner {
                        Value::Array(records) => Payload::Wrapper { key, records },
                        obj @ Value::Object(_) => Payload::Wrapper {
                            key,
                            records: vec![obj],
                        },
                        other => Payload::Unrecognized {
                            type_name: json_type_name(&other),
                        },
                    };
                }
                Payload::SingleObject(map)
            }
            other => Payload::Unrecognized {
                type_name: json_type_name(&other),
            },
        }
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            Payload::List(items) => items,
            Payload::Wrapper { records, .. } => records,
            Payload::SingleObject(map) => vec![Value::Object(map)],
            Payload::Unrecognized { type_name } => {
                tracing::warn!(type_name, "unexpected payload shape, treating as empty");
                Vec::new()
            }
        }
    }
}

/// Runtime type name of a JSON value, as recorded in inferred schemas.
pub fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    retry: RetryPolicy,
    page_delay: Duration,
    pagination: Option<PaginationSettings>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base_url =
            Url::parse(base_url).map_err(|e| FetchError::InvalidUrl(format!("{base_url}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: base_url.to_string(),
                source: e,
            })?;

        Ok(Self {
            http,
            base_url,
            retry: RetryPolicy::default(),
            page_delay: DEFAULT_PAGE_DELAY,
            pagination: None,
        })
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, FetchError> {
        let client = Self::with_timeout(&cfg.endpoint, cfg.api_timeout)?
            .with_retry(RetryPolicy::default().with_max_attempts(cfg.api_max_retries));
        Ok(match &cfg.pagination {
            Some(p) => client.with_pagination(p.clone()),
            None => client,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pause between page requests (rate-limit courtesy).
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Make `fetch_records` walk pages instead of issuing a single request.
    pub fn with_pagination(mut self, pagination: PaginationSettings) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, endpoint: &str) -> Result<Url, FetchError> {
        if endpoint.is_empty() {
            return Ok(self.base_url.clone());
        }
        self.base_url
            .join(endpoint)
            .map_err(|e| FetchError::InvalidUrl(format!("{endpoint}: {e}")))
    }

    /// Fetch one response and normalize it into a record list.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.fetch_inner(endpoint, params, false).await
    }

    async fn fetch_inner(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        no_cache: bool,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.resolve(endpoint)?;
        tracing::info!(%url, params = params.len(), "fetching data");

        let body = self
            .retry
            .run(url.as_str(), || self.get_json(&url, params, no_cache))
            .await?;

        let records = Payload::classify(body).into_records();
        counter!("records_fetched_total").increment(records.len() as u64);
        Ok(records)
    }

    async fn get_json(
        &self,
        url: &Url,
        params: &[(String, String)],
        no_cache: bool,
    ) -> Result<Value, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source: e,
        };

        let mut req = self.http.get(url.clone()).query(params);
        if no_cache {
            req = req.header(CACHE_CONTROL, "no-cache");
        }
        counter!("api_requests_total").increment(1);
        let resp = req.send().await.map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!(%url, error = %e, "failed to parse JSON response");
            FetchError::Format {
                url: url.to_string(),
                source: e,
            }
        })
    }

    /// Walk `page=1..` until an empty page or `max_pages`, concatenating pages
    /// in arrival order.
    pub async fn fetch_paginated(
        &self,
        endpoint: &str,
        page_size: u32,
        max_pages: Option<u32>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.paginate(endpoint, &[], page_size, max_pages, false)
            .await
    }

    async fn paginate(
        &self,
        endpoint: &str,
        base_params: &[(String, String)],
        page_size: u32,
        max_pages: Option<u32>,
        no_cache: bool,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            if max_pages.is_some_and(|max| page > max) {
                break;
            }

            let mut params: Vec<(String, String)> = base_params
                .iter()
                .filter(|(k, _)| k != "page" && k != "per_page")
                .cloned()
                .collect();
            params.push(("page".into(), page.to_string()));
            params.push(("per_page".into(), page_size.to_string()));

            let mut batch = self.fetch_inner(endpoint, &params, no_cache).await?;
            if batch.is_empty() {
                break;
            }
            tracing::info!(page, records = batch.len(), "fetched page");
            all.append(&mut batch);

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            page += 1;
        }

        tracing::info!(total = all.len(), "total records fetched");
        Ok(all)
    }
}

#[async_trait]
impl RecordSource for ApiClient {
    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
        let params: Vec<(String, String)> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        match &self.pagination {
            Some(p) => {
                self.paginate("", &params, p.page_size, p.max_pages, request.force_refresh)
                    .await
            }
            None => self.fetch_inner("", &params, request.force_refresh).await,
        }
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}

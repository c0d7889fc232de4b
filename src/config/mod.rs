// src/config/mod.rs
//! Pipeline configuration, resolved from the environment on every invocation.
//!
//! Process-level settings (log level and format, storage root, bind address,
//! schedule interval) are command-line flags of the binary and never pass
//! through here.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_BUCKET: &str = "DATA_BUCKET_NAME";
pub const ENV_ENDPOINT: &str = "API_ENDPOINT";
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";
pub const ENV_OUTPUT_FORMAT: &str = "OUTPUT_FORMAT";
pub const ENV_API_TIMEOUT_SECS: &str = "API_TIMEOUT_SECS";
pub const ENV_API_MAX_RETRIES: &str = "API_MAX_RETRIES";
pub const ENV_API_PAGINATE: &str = "API_PAGINATE";
pub const ENV_API_PAGE_SIZE: &str = "API_PAGE_SIZE";
pub const ENV_API_MAX_PAGES: &str = "API_MAX_PAGES";

pub const DEFAULT_OUTPUT_FORMAT: &str = "parquet";

// Binary defaults.
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_STORAGE_ROOT: &str = "./data";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
/// Every 6 hours.
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 6 * 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationSettings {
    pub page_size: u32,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bucket: String,
    pub endpoint: String,
    pub environment: String,
    /// Kept as text: an unknown value is an encoding error at write time.
    pub output_format: String,
    pub api_timeout: Duration,
    pub api_max_retries: u32,
    pub pagination: Option<PaginationSettings>,
}

impl PipelineConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Read configuration through an arbitrary lookup (tests, embedding).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let bucket = required(ENV_BUCKET)?;
        let endpoint = required(ENV_ENDPOINT)?;
        let environment = required(ENV_ENVIRONMENT)?;

        let paginate = get(ENV_API_PAGINATE).is_some_and(|v| is_truthy(&v));
        let pagination = if paginate {
            Some(PaginationSettings {
                page_size: parse_num(ENV_API_PAGE_SIZE, get(ENV_API_PAGE_SIZE))?.unwrap_or(100),
                max_pages: parse_num(ENV_API_MAX_PAGES, get(ENV_API_MAX_PAGES))?,
            })
        } else {
            None
        };

        let timeout_secs: u64 =
            parse_num(ENV_API_TIMEOUT_SECS, get(ENV_API_TIMEOUT_SECS))?.unwrap_or(30);
        let max_retries: u32 =
            parse_num(ENV_API_MAX_RETRIES, get(ENV_API_MAX_RETRIES))?.unwrap_or(3);
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_API_MAX_RETRIES,
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            bucket,
            endpoint,
            environment,
            output_format: get(ENV_OUTPUT_FORMAT)
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string())
                .to_ascii_lowercase(),
            api_timeout: Duration::from_secs(timeout_secs.max(1)),
            api_max_retries: max_retries,
            pagination,
        })
    }
}

/// Resolves configuration at invocation time. Shared by the HTTP surface and
/// the scheduler so a bad setting fails the run, not the process.
pub type ConfigLoader = Arc<dyn Fn() -> Result<PipelineConfig, ConfigError> + Send + Sync>;

pub fn env_loader() -> ConfigLoader {
    Arc::new(PipelineConfig::from_env)
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_num<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|s| {
        s.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })
    })
    .transpose()
}

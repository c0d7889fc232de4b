// tests/config_env.rs
//
// Reads from the real process environment, so every test is serialized.

use std::env;
use std::time::Duration;

use extract_pipeline::config::{env_loader, PipelineConfig};
use extract_pipeline::error::ConfigError;

const VARS: [&str; 8] = [
    "DATA_BUCKET_NAME",
    "API_ENDPOINT",
    "ENVIRONMENT",
    "OUTPUT_FORMAT",
    "API_TIMEOUT_SECS",
    "API_PAGINATE",
    "API_PAGE_SIZE",
    "API_MAX_PAGES",
];

fn clear() {
    for v in VARS {
        env::remove_var(v);
    }
}

fn set_required() {
    env::set_var("DATA_BUCKET_NAME", "env-bucket");
    env::set_var("API_ENDPOINT", "https://api.example.com/users");
    env::set_var("ENVIRONMENT", "staging");
}

#[serial_test::serial]
#[test]
fn from_env_reads_required_and_defaults() {
    clear();
    set_required();

    let cfg = PipelineConfig::from_env().unwrap();
    assert_eq!(cfg.bucket, "env-bucket");
    assert_eq!(cfg.environment, "staging");
    assert_eq!(cfg.output_format, "parquet");
    assert_eq!(cfg.api_timeout, Duration::from_secs(30));
    assert!(cfg.pagination.is_none());
    clear();
}

#[serial_test::serial]
#[test]
fn missing_endpoint_is_reported() {
    clear();
    set_required();
    env::remove_var("API_ENDPOINT");

    assert_eq!(
        PipelineConfig::from_env().unwrap_err(),
        ConfigError::Missing("API_ENDPOINT")
    );
    clear();
}

#[serial_test::serial]
#[test]
fn loader_sees_changes_between_invocations() {
    clear();
    let loader = env_loader();
    assert!(loader().is_err());

    set_required();
    env::set_var("API_PAGINATE", "yes");
    env::set_var("API_PAGE_SIZE", "50");
    let cfg = loader().unwrap();
    let p = cfg.pagination.expect("pagination on");
    assert_eq!(p.page_size, 50);
    assert_eq!(p.max_pages, None);
    clear();
}

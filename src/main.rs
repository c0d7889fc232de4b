//! Extraction pipeline binary.
//!
//! `extract-pipeline once`  runs a single invocation and prints the response.
//! `extract-pipeline serve` (default) serves `/health`, `/invoke` and
//! `/metrics` and fires the recurring schedule.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tower_http::trace::TraceLayer;

use extract_pipeline::api::{self, AppState};
use extract_pipeline::config::{
    env_loader, DEFAULT_BIND_ADDR, DEFAULT_LOG_LEVEL, DEFAULT_SCHEDULE_INTERVAL_SECS,
    DEFAULT_STORAGE_ROOT,
};
use extract_pipeline::handler::{handle, InvocationEvent};
use extract_pipeline::ingest::scheduler::{spawn_extract_scheduler, ExtractSchedulerCfg};
use extract_pipeline::metrics::Metrics;
use extract_pipeline::storage::{FsStore, ObjectStore};
use extract_pipeline::telemetry;

#[derive(Parser, Debug)]
#[command(name = "extract-pipeline")]
#[command(about = "Pull records from an HTTP API and write partitioned objects", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL, global = true)]
    log_level: String,

    #[arg(
        long,
        env = "LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value = "compact",
        global = true
    )]
    log_format: LogFormat,

    /// Directory holding one subdirectory per bucket
    #[arg(long, env = "STORAGE_ROOT", default_value = DEFAULT_STORAGE_ROOT, global = true)]
    storage_root: PathBuf,

    #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR, global = true)]
    bind_addr: String,

    /// Seconds between scheduled runs in serve mode
    #[arg(
        long,
        env = "SCHEDULE_INTERVAL_SECS",
        default_value_t = DEFAULT_SCHEDULE_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    schedule_interval_secs: u64,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run a single invocation and print the response
    Once {
        /// Invocation event as JSON
        #[arg(long, env = "EXTRACT_EVENT")]
        event: Option<String>,
    },
    /// Serve HTTP and fire the recurring schedule
    Serve,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev before flags read their env fallbacks.
    let _ = dotenvy::dotenv();
    let mut cli = Cli::parse();

    telemetry::init(&cli.log_level, cli.log_format == LogFormat::Json);

    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(cli.storage_root.clone()));

    match cli.cmd.take().unwrap_or(Command::Serve) {
        Command::Once { event } => run_once(event.as_deref(), store).await,
        Command::Serve => serve(&cli, store).await,
    }
}

fn parse_event(raw: Option<&str>) -> Result<InvocationEvent> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).context("parse invocation event")
        }
        _ => Ok(InvocationEvent::default()),
    }
}

async fn run_once(event: Option<&str>, store: Arc<dyn ObjectStore>) -> Result<()> {
    let event = parse_event(event)?;
    let correlation_id = uuid::Uuid::new_v4().to_string();

    let loader = env_loader();
    let resp = handle(&event, loader(), store, &correlation_id).await;
    println!("{}", serde_json::to_string_pretty(&resp)?);

    if !resp.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(cli: &Cli, store: Arc<dyn ObjectStore>) -> Result<()> {
    let metrics = Metrics::init()?;
    let loader = env_loader();

    let _scheduler = spawn_extract_scheduler(
        ExtractSchedulerCfg {
            interval: Duration::from_secs(cli.schedule_interval_secs),
            run_immediately: false,
        },
        loader.clone(),
        store.clone(),
    );

    let app = api::create_router(AppState::new(store, loader))
        .merge(metrics.router())
        .layer(TraceLayer::new_for_http());

    let addr = &cli.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        %addr,
        interval_secs = cli.schedule_interval_secs,
        "extract-pipeline listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

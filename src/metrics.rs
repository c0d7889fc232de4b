// src/metrics.rs
use std::future::Future;
use std::time::Instant;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("api_requests_total", "Upstream API requests sent.");
        describe_counter!("api_retries_total", "Upstream API retries after transient faults.");
        describe_counter!("records_fetched_total", "Raw records returned by the upstream API.");
        describe_counter!("records_processed_total", "Records that passed processing.");
        describe_counter!("records_rejected_total", "Records skipped by the processor.");
        describe_counter!(
            "records_duplicate_total",
            "Records dropped because their id was already in the batch."
        );
        describe_counter!("objects_written_total", "Data objects written to storage.");
        describe_counter!(
            "metadata_write_failures_total",
            "Sidecar metadata writes that failed (data object kept)."
        );
        describe_counter!(
            "pipeline_stage_total",
            "Pipeline stage executions by stage and outcome."
        );
        describe_counter!(
            "scheduled_runs_total",
            "Scheduler-triggered invocations by response status."
        );
        describe_histogram!(
            "pipeline_stage_duration_ms",
            "Pipeline stage duration in milliseconds."
        );
        describe_gauge!(
            "pipeline_last_success_ts",
            "Unix ts of the last invocation that finished successfully."
        );
    });
}

/// Run `fut` as pipeline stage `stage`, recording its duration and outcome.
pub async fn timed<T, E, Fut>(stage: &'static str, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let t0 = Instant::now();
    let res = fut.await;
    let outcome = if res.is_ok() { "success" } else { "error" };
    histogram!("pipeline_stage_duration_ms", "stage" => stage)
        .record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("pipeline_stage_total", "stage" => stage, "outcome" => outcome).increment(1);
    res
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Only one recorder may exist per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

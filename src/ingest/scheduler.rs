// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ConfigLoader;
use crate::handler::{handle, InvocationEvent};
use crate::storage::ObjectStore;

#[derive(Clone, Copy, Debug)]
pub struct ExtractSchedulerCfg {
    pub interval: Duration,
    /// Fire once at startup instead of waiting a full interval.
    pub run_immediately: bool,
}

/// Spawn the recurring trigger. Each tick is an independent invocation with
/// the default event; a failed run is logged and the next tick still fires.
pub fn spawn_extract_scheduler(
    cfg: ExtractSchedulerCfg,
    config: ConfigLoader,
    store: Arc<dyn ObjectStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !cfg.run_immediately {
            // the first tick completes immediately
            ticker.tick().await;
        }
        loop {
            ticker.tick().await;
            let correlation_id = uuid::Uuid::new_v4().to_string();
            let resp = handle(
                &InvocationEvent::default(),
                config(),
                store.clone(),
                &correlation_id,
            )
            .await;

            counter!("scheduled_runs_total", "status" => resp.status_code.to_string())
                .increment(1);
            tracing::info!(
                target: "scheduler",
                %correlation_id,
                status = resp.status_code,
                message = %resp.body.message,
                "scheduled extraction tick"
            );
        }
    })
}

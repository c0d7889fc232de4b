// src/telemetry.rs
//! Process-wide tracing setup. Call `init` once at process start; later calls
//! are no-ops so tests and embedders can call it freely.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP client/server crates are chatty at debug; keep them at warn.
const QUIET_DEPS: &str = "hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn";

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (from `LOG_LEVEL`) applies to
/// everything except the dependencies listed in `QUIET_DEPS`.
pub fn init(level: &str, json: bool) {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

        let registry = tracing_subscriber::registry().with(filter);
        // try_init: a subscriber set elsewhere (e.g. a test harness) is not an error.
        let _ = if json {
            registry
                .with(fmt::layer().json().with_current_span(false))
                .try_init()
        } else {
            registry.with(fmt::layer().compact()).try_init()
        };
    });
}

fn default_directives(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        _ => "info".to_string(),
    };
    format!("{level},{QUIET_DEPS}")
}

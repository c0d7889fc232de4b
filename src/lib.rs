// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod handler;
pub mod ingest;
pub mod metrics;
pub mod storage;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::PipelineConfig;
pub use crate::error::{ConfigError, FetchError, PipelineError, StorageError, StoreError};
pub use crate::handler::{handle, InvocationEvent, InvocationResponse, Orchestrator, Outcome, Stage};

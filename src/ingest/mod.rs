// src/ingest/mod.rs
pub mod client;
pub mod processor;
pub mod quality;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use client::ApiClient;
pub use processor::DataProcessor;
pub use retry::RetryPolicy;
pub use types::{BatchMetadata, FetchRequest, ProcessedRecord, RawRecord, RecordSource};

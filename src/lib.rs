//! Log Mirror Library
//!
//! This library provides components for mirroring a cloud log service to
//! local files:
//!
//! - **model**: Groups, streams, events and per-stream checkpoints
//! - **client**: Log service API seam and its HTTP implementation with retries
//! - **inventory**: Group and stream discovery with id-based diffing
//! - **fetcher**: Paginated, checkpointed event retrieval
//! - **sink**: Per-stream file output with size-based rotation
//! - **runner**: Fixed-interval scheduler with a bounded worker pool
//! - **config**: Environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use log_mirror::client::{HttpLogsClient, LogsApi};
//! use log_mirror::config::Config;
//! use log_mirror::runner::Runner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = HttpLogsClient::new(&config).expect("Failed to create client");
//!     let api: Arc<dyn LogsApi> = Arc::new(client);
//!
//!     let runner = Runner::new(&config, api);
//!     runner
//!         .run_until(async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await;
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod fetcher;
pub mod inventory;
pub mod model;
pub mod runner;
pub mod sink;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, HttpLogsClient, LogsApi};
pub use config::{Config, ConfigError};
pub use fetcher::{FetchedWindow, Fetcher};
pub use inventory::{Inventory, RefreshSummary};
pub use model::{
    Event, EventPage, EventsQuery, Group, GroupDescriptor, Resource, Stream, StreamDescriptor,
    StreamLease,
};
pub use runner::{PollError, PollOutcome, PollStatsSnapshot, Runner, RunnerState};
pub use sink::{FileSink, SinkError, SinkOutcome};

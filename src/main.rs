//! Log Mirror - Mirrors a cloud log service into local rotating files
//!
//! Every poll interval the service lists log groups and streams, pulls the
//! events each stream produced since its checkpoint, and appends them to one
//! file per stream.
//!
//! ## Features
//!
//! - Inventory refresh with backfill of newly created streams
//! - Paginated event retrieval with per-stream checkpoints
//! - Size-based file rotation
//! - Bounded worker pool, never two polls of one stream at once
//! - Graceful shutdown on SIGINT
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `LOG_MIRROR_API_URL`: Log service endpoint (default: http://localhost:4566)
//! - `LOG_MIRROR_OUTPUT_DIR`: Directory for mirrored files (default: .)
//! - `LOG_MIRROR_POLL_INTERVAL_SECS`: Seconds between ticks (default: 30)
//! - `LOG_MIRROR_PAGE_LIMIT`: Events per page request (default: 1000)
//! - `LOG_MIRROR_ROTATION_BYTES`: File size that triggers rotation (default: 1048576)
//! - `LOG_MIRROR_WORKERS`: Concurrent poll tasks (default: available cores)
//! - `LOG_MIRROR_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
//! - `LOG_MIRROR_MAX_RETRIES`: Max retry attempts (default: 3)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::future::Future;
use std::io;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use log_mirror::client::{HttpLogsClient, LogsApi};
use log_mirror::config::Config;
use log_mirror::runner::Runner;

/// Default log filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting Log Mirror service...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                api_url = %config.api_url,
                output_dir = %config.output_dir.display(),
                poll_interval_secs = config.poll_interval.as_secs(),
                page_limit = config.page_limit,
                rotation_bytes = config.rotation_threshold,
                workers = config.workers,
                max_retries = config.max_retries,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let api: Arc<dyn LogsApi> = match HttpLogsClient::new(&config) {
        Ok(client) => {
            info!(endpoint = %client.endpoint(), "HTTP client initialized");
            Arc::new(client)
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let runner = Runner::new(&config, api);

    info!("Log Mirror running. Press Ctrl+C to stop.");
    let stats = runner
        .run_until(shutdown_signal(tokio::signal::ctrl_c()))
        .await;

    info!(
        ticks = stats.ticks,
        events_written = stats.events_written,
        coalesced = stats.tasks_coalesced,
        rotations = stats.rotations,
        fetch_failures = stats.fetch_failures,
        sink_failures = stats.sink_failures,
        "Log Mirror stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Resolve when `signal` fires.
///
/// If the signal cannot be listened for, never resolve: the mirror keeps
/// running rather than stopping right after startup.
async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

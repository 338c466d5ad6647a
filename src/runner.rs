//! Fixed-interval polling loop.
//!
//! Every tick refreshes the inventory and then submits one poll task per
//! known stream without waiting for earlier tasks. A poll task holds its
//! stream's lease from fetch to checkpoint advance, so overlapping ticks
//! queue up behind each other per stream while different streams run in
//! parallel, bounded by the worker pool. At most one task per stream waits
//! for the lease; ticks that find one already waiting skip that stream.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, LogsApi};
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::inventory::Inventory;
use crate::model::{Resource, Stream};
use crate::sink::{FileSink, SinkError};

/// Emit a stats line every this many ticks.
const STATS_REPORT_TICKS: u64 = 10;

/// How long shutdown waits for in-flight poll tasks.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the runner is between ticks or dispatching one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Polling,
}

/// Errors that abort a single poll task.
#[derive(Debug)]
pub enum PollError {
    /// A page request failed; the checkpoint was not advanced
    Fetch(ClientError),

    /// Writing the events failed; the checkpoint was not advanced
    Sink(SinkError),

    /// The worker pool was shut down
    PoolClosed,
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Fetch(e) => write!(f, "Fetch failed: {}", e),
            PollError::Sink(e) => write!(f, "Write failed: {}", e),
            PollError::PoolClosed => write!(f, "Worker pool closed"),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Fetch(e) => Some(e),
            PollError::Sink(e) => Some(e),
            PollError::PoolClosed => None,
        }
    }
}

/// Result of one successful poll task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub events: usize,
    pub pages: usize,
    /// Checkpoint after the task
    pub checkpoint: i64,
    pub rotated_to: Option<PathBuf>,
}

/// Counters shared by the runner and its poll tasks.
#[derive(Debug, Default)]
pub struct PollStats {
    ticks: AtomicU64,
    tasks_dispatched: AtomicU64,
    tasks_coalesced: AtomicU64,
    tasks_completed: AtomicU64,
    events_written: AtomicU64,
    fetch_failures: AtomicU64,
    sink_failures: AtomicU64,
    rotations: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Point-in-time copy of [`PollStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatsSnapshot {
    pub ticks: u64,
    pub tasks_dispatched: u64,
    /// Streams skipped because a poll was already waiting for them
    pub tasks_coalesced: u64,
    /// Tasks that finished, successfully or not
    pub tasks_completed: u64,
    pub events_written: u64,
    pub fetch_failures: u64,
    pub sink_failures: u64,
    pub rotations: u64,
    pub refresh_failures: u64,
}

impl PollStats {
    pub fn snapshot(&self) -> PollStatsSnapshot {
        PollStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_coalesced: self.tasks_coalesced.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<PollOutcome, PollError>) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(outcome) => {
                self.events_written
                    .fetch_add(outcome.events as u64, Ordering::Relaxed);
                if outcome.rotated_to.is_some() {
                    self.rotations.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(PollError::Fetch(_)) => {
                self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(PollError::Sink(_)) => {
                self.sink_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(PollError::PoolClosed) => {}
        }
    }
}

/// Fetch, write and commit one stream's new events.
///
/// Waits for the stream's lease before taking a pool slot, so a stream that
/// is still busy from an earlier tick does not occupy a worker.
pub async fn poll_stream(
    stream: &Arc<Stream>,
    fetcher: &Fetcher,
    sink: &FileSink,
    pool: &Semaphore,
) -> Result<PollOutcome, PollError> {
    let mut lease = stream.lock().await;
    let _permit = pool.acquire().await.map_err(|_| PollError::PoolClosed)?;

    let window = fetcher
        .fetch_new_events(&lease)
        .await
        .map_err(PollError::Fetch)?;

    let written = sink
        .append_and_rotate(stream, &window.events)
        .await
        .map_err(PollError::Sink)?;

    let outcome = PollOutcome {
        events: written.written,
        pages: window.pages,
        checkpoint: window.upper_bound.max(lease.checkpoint()),
        rotated_to: written.rotated_to,
    };
    window.commit(&mut lease);

    Ok(outcome)
}

/// Body of a spawned poll task: run it, count it, log it.
async fn run_task(
    stream: Arc<Stream>,
    fetcher: Arc<Fetcher>,
    sink: Arc<FileSink>,
    pool: Arc<Semaphore>,
    stats: Arc<PollStats>,
) {
    let result = poll_stream(&stream, &fetcher, &sink, &pool).await;
    stats.record(&result);

    match result {
        Ok(outcome) if outcome.events > 0 => {
            info!(
                group = %stream.group(),
                stream = %stream.name(),
                events = outcome.events,
                pages = outcome.pages,
                "Mirrored events"
            );
        }
        Ok(_) => {
            debug!(group = %stream.group(), stream = %stream.name(), "No new events");
        }
        Err(e) => {
            warn!(
                group = %stream.group(),
                stream = %stream.name(),
                stream_id = %stream.id(),
                error = %e,
                "Poll failed, checkpoint unchanged"
            );
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Poll task panicked");
        }
    }
}

/// Drives the tick loop and owns the inventory.
pub struct Runner {
    api: Arc<dyn LogsApi>,
    fetcher: Arc<Fetcher>,
    sink: Arc<FileSink>,
    pool: Arc<Semaphore>,
    poll_interval: Duration,
    inventory: Option<Inventory>,
    tasks: JoinSet<()>,
    stats: Arc<PollStats>,
    state: RunnerState,
}

impl Runner {
    /// Create a runner from configuration around an existing API client.
    pub fn new(config: &Config, api: Arc<dyn LogsApi>) -> Self {
        let fetcher = Fetcher::new(api.clone(), config.page_limit);
        let sink = FileSink::new(&config.output_dir, config.rotation_threshold);
        Self::with_parts(api, fetcher, sink, config.workers, config.poll_interval)
    }

    pub fn with_parts(
        api: Arc<dyn LogsApi>,
        fetcher: Fetcher,
        sink: FileSink,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            fetcher: Arc::new(fetcher),
            sink: Arc::new(sink),
            pool: Arc::new(Semaphore::new(workers.max(1))),
            poll_interval,
            inventory: None,
            tasks: JoinSet::new(),
            stats: Arc::new(PollStats::default()),
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn stats(&self) -> PollStatsSnapshot {
        self.stats.snapshot()
    }

    /// The inventory, once the first listing has succeeded.
    pub fn inventory(&self) -> Option<&Inventory> {
        self.inventory.as_ref()
    }

    /// Poll tasks submitted but not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Run one tick: refresh the inventory, then submit a poll task per
    /// stream that has none waiting. Returns the number of tasks submitted.
    pub async fn tick(&mut self) -> usize {
        self.state = RunnerState::Polling;
        let tick = self.stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        self.reap();
        self.refresh_inventory().await;
        let dispatched = self.dispatch();

        debug!(
            tick = tick,
            dispatched = dispatched,
            in_flight = self.tasks.len(),
            "Tick dispatched"
        );

        if tick % STATS_REPORT_TICKS == 0 {
            let stats = self.stats.snapshot();
            info!(
                ticks = stats.ticks,
                streams = self.inventory.as_ref().map_or(0, Inventory::stream_count),
                events_written = stats.events_written,
                coalesced = stats.tasks_coalesced,
                fetch_failures = stats.fetch_failures,
                sink_failures = stats.sink_failures,
                rotations = stats.rotations,
                refresh_failures = stats.refresh_failures,
                "Mirror progress"
            );
        }

        self.state = RunnerState::Idle;
        dispatched
    }

    /// Load the inventory on first success, reconcile it afterwards. A
    /// failed listing keeps whatever is already known.
    async fn refresh_inventory(&mut self) {
        let api = self.api.as_ref();

        if let Some(inventory) = self.inventory.as_mut() {
            match inventory.refresh(api).await {
                Ok(summary) if !summary.is_unchanged() => {
                    info!(
                        groups_added = summary.groups_added,
                        groups_removed = summary.groups_removed,
                        streams_added = summary.streams_added,
                        streams_removed = summary.streams_removed,
                        "Inventory updated"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Inventory refresh failed, keeping previous inventory");
                }
            }
        } else {
            match Inventory::bootstrap(api).await {
                Ok(inventory) => self.inventory = Some(inventory),
                Err(e) => {
                    self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Initial inventory listing failed, retrying next tick");
                }
            }
        }
    }

    fn dispatch(&mut self) -> usize {
        let Some(inventory) = &self.inventory else {
            return 0;
        };

        let mut dispatched = 0;
        let mut coalesced = 0;
        for stream in inventory.streams() {
            // A poll already waiting for the lease covers this tick too
            if !stream.try_enqueue() {
                coalesced += 1;
                continue;
            }

            let task = run_task(
                Arc::clone(stream),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.sink),
                Arc::clone(&self.pool),
                Arc::clone(&self.stats),
            );
            self.tasks.spawn(task);
            dispatched += 1;
        }

        self.stats
            .tasks_dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        if coalesced > 0 {
            self.stats
                .tasks_coalesced
                .fetch_add(coalesced as u64, Ordering::Relaxed);
            debug!(coalesced = coalesced, "Streams still queued from an earlier tick");
        }
        dispatched
    }

    /// Collect finished tasks without waiting.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join(result);
        }
    }

    /// Wait up to `limit` for in-flight tasks; abort the rest.
    ///
    /// Returns whether every task finished in time.
    pub async fn drain(&mut self, limit: Duration) -> bool {
        let tasks = &mut self.tasks;
        let finished = tokio::time::timeout(limit, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await
        .is_ok();

        if !finished {
            warn!(
                remaining = self.tasks.len(),
                "Poll tasks still running after {:?}, aborting", limit
            );
            self.tasks.abort_all();
            while let Some(result) = self.tasks.join_next().await {
                log_join(result);
            }
            // Aborted waiters never took their lease
            if let Some(inventory) = &self.inventory {
                for stream in inventory.streams() {
                    stream.clear_queued();
                }
            }
        }
        finished
    }

    /// Poll forever.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Poll until `shutdown` resolves, then drain in-flight tasks.
    ///
    /// Ticks start every `poll_interval` measured from tick start; a tick
    /// that overruns delays the next one instead of bursting.
    pub async fn run_until<F>(mut self, shutdown: F) -> PollStatsSnapshot
    where
        F: Future<Output = ()>,
    {
        info!(
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            workers = self.pool.available_permits(),
            page_limit = self.fetcher.page_limit(),
            output_dir = %self.sink.output_dir().display(),
            "Starting log mirror"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(in_flight = self.tasks.len(), "Stopping, draining poll tasks");
        self.drain(DRAIN_TIMEOUT).await;
        self.stats.snapshot()
    }
}

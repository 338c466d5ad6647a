#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log_mirror::client::{ClientError, LogsApi};
use log_mirror::fetcher::Fetcher;
use log_mirror::model::{
    now_millis, Event, EventPage, EventsQuery, GroupDescriptor, Stream, StreamDescriptor,
};
use log_mirror::runner::Runner;
use log_mirror::sink::FileSink;

#[derive(Default)]
struct State {
    groups: BTreeMap<String, GroupDescriptor>,
    streams: BTreeMap<String, Vec<StreamDescriptor>>,
    events: HashMap<(String, String), Vec<Event>>,
    requests: Vec<EventsQuery>,
}

/// In-memory log service honouring time windows and continuation tokens.
///
/// Tokens encode an offset into the window's events sorted by timestamp.
#[derive(Default)]
pub struct SimulatedLogs {
    state: Mutex<State>,
}

impl SimulatedLogs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_group(&self, name: &str) {
        self.state.lock().unwrap().groups.insert(
            name.to_string(),
            GroupDescriptor {
                id: format!("arn:logs:group:{}", name),
                name: name.to_string(),
                creation_time: now_millis(),
                stored_bytes: None,
                metric_filter_count: None,
            },
        );
    }

    pub fn create_stream_at(&self, group: &str, name: &str, creation_time: i64) {
        self.state
            .lock()
            .unwrap()
            .streams
            .entry(group.to_string())
            .or_default()
            .push(StreamDescriptor {
                id: format!("arn:logs:group:{}:stream:{}", group, name),
                name: name.to_string(),
                creation_time,
                first_event_timestamp: None,
                last_event_timestamp: None,
                last_ingestion_time: None,
                stored_bytes: None,
            });
    }

    pub fn create_stream(&self, group: &str, name: &str) -> i64 {
        let created = now_millis();
        self.create_stream_at(group, name, created);
        created
    }

    pub fn delete_stream(&self, group: &str, name: &str) {
        if let Some(streams) = self.state.lock().unwrap().streams.get_mut(group) {
            streams.retain(|s| s.name != name);
        }
    }

    pub fn put(&self, group: &str, stream: &str, timestamp: i64, message: &str) {
        self.state
            .lock()
            .unwrap()
            .events
            .entry((group.to_string(), stream.to_string()))
            .or_default()
            .push(Event::new(timestamp, message));
    }

    /// Store `count` events stamped with the current time.
    pub fn put_now(&self, group: &str, stream: &str, prefix: &str, count: usize) {
        let now = now_millis();
        for i in 0..count {
            self.put(group, stream, now, &format!("{}-{}", prefix, i));
        }
    }

    pub fn requests_for(&self, stream: &str) -> Vec<EventsQuery> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|q| q.stream_name == stream)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LogsApi for SimulatedLogs {
    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>, ClientError> {
        Ok(self.state.lock().unwrap().groups.values().cloned().collect())
    }

    async fn list_streams(&self, group_name: &str) -> Result<Vec<StreamDescriptor>, ClientError> {
        let state = self.state.lock().unwrap();
        if !state.groups.contains_key(group_name) {
            return Err(ClientError::Parse(format!("unknown group {}", group_name)));
        }
        Ok(state.streams.get(group_name).cloned().unwrap_or_default())
    }

    async fn get_events(&self, query: &EventsQuery) -> Result<EventPage, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(query.clone());

        let key = (query.group_name.clone(), query.stream_name.clone());
        let mut window: Vec<Event> = state
            .events
            .get(&key)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.timestamp >= query.start_time && e.timestamp < query.end_time)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        window.sort_by_key(|e| e.timestamp);

        let offset: usize = query
            .next_token
            .as_deref()
            .and_then(|t| t.strip_prefix("t/"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let events: Vec<Event> = window.into_iter().skip(offset).take(query.limit).collect();
        let next_token = Some(format!("t/{}", offset + events.len()));

        Ok(EventPage { events, next_token })
    }
}

pub fn runner(
    api: &Arc<SimulatedLogs>,
    dir: &std::path::Path,
    page_limit: usize,
    rotation: u64,
) -> Runner {
    let api: Arc<dyn LogsApi> = api.clone();
    Runner::with_parts(
        api.clone(),
        Fetcher::new(api, page_limit),
        FileSink::new(dir, rotation),
        4,
        Duration::from_millis(50),
    )
}

/// Run one tick and wait for its poll tasks.
pub async fn tick(runner: &mut Runner) -> usize {
    let dispatched = runner.tick().await;
    assert!(runner.drain(Duration::from_secs(5)).await);
    dispatched
}

/// Let the clock move past events stamped "now".
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

pub fn stream(runner: &Runner, group: &str, name: &str) -> Arc<Stream> {
    runner
        .inventory()
        .unwrap()
        .group(group)
        .unwrap()
        .streams()
        .iter()
        .find(|s| s.name() == name)
        .cloned()
        .unwrap()
}

pub fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

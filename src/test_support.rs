//! Scripted in-memory [`LogsApi`] for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::client::{ClientError, LogsApi};
use crate::model::{Event, EventPage, EventsQuery, GroupDescriptor, StreamDescriptor};

pub(crate) fn group(name: &str, creation_time: i64) -> GroupDescriptor {
    GroupDescriptor {
        id: format!("arn:group:{}", name),
        name: name.to_string(),
        creation_time,
        stored_bytes: None,
        metric_filter_count: None,
    }
}

pub(crate) fn stream(group: &str, name: &str, creation_time: i64) -> StreamDescriptor {
    StreamDescriptor {
        id: format!("arn:group:{}:stream:{}", group, name),
        name: name.to_string(),
        creation_time,
        first_event_timestamp: None,
        last_event_timestamp: None,
        last_ingestion_time: None,
        stored_bytes: None,
    }
}

pub(crate) fn events(count: usize, prefix: &str) -> Vec<Event> {
    (0..count)
        .map(|i| Event::new(i as i64, format!("{}-{}", prefix, i)))
        .collect()
}

fn unavailable(what: &str) -> ClientError {
    ClientError::Status {
        code: StatusCode::SERVICE_UNAVAILABLE,
        message: format!("{} unavailable", what),
    }
}

/// A scripted page: events, or `None` to fail that request.
type Scripted = Option<Vec<Event>>;

#[derive(Default)]
struct State {
    groups: Vec<GroupDescriptor>,
    streams: HashMap<String, Vec<StreamDescriptor>>,
    pages: HashMap<(String, String), VecDeque<Scripted>>,
    fail_list_groups: bool,
    fail_list_streams: HashSet<String>,
    queries: Vec<EventsQuery>,
    list_streams_calls: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    max_total_in_flight: usize,
    total_in_flight: usize,
}

/// In-memory API whose listings and event pages are set by the test.
///
/// Event requests with no scripted page left return an empty page.
#[derive(Default)]
pub(crate) struct FakeLogsApi {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl FakeLogsApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hold every event request for `delay` before answering.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            delay: Some(delay),
        }
    }

    pub(crate) fn set_groups(&self, groups: Vec<GroupDescriptor>) {
        self.state.lock().unwrap().groups = groups;
    }

    pub(crate) fn set_streams(&self, group: &str, streams: Vec<StreamDescriptor>) {
        self.state
            .lock()
            .unwrap()
            .streams
            .insert(group.to_string(), streams);
    }

    pub(crate) fn push_page(&self, group: &str, stream: &str, events: Vec<Event>) {
        self.push(group, stream, Some(events));
    }

    pub(crate) fn push_failure(&self, group: &str, stream: &str) {
        self.push(group, stream, None);
    }

    fn push(&self, group: &str, stream: &str, page: Scripted) {
        self.state
            .lock()
            .unwrap()
            .pages
            .entry((group.to_string(), stream.to_string()))
            .or_default()
            .push_back(page);
    }

    pub(crate) fn fail_list_groups(&self, fail: bool) {
        self.state.lock().unwrap().fail_list_groups = fail;
    }

    pub(crate) fn fail_list_streams(&self, group: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_list_streams.insert(group.to_string());
        } else {
            state.fail_list_streams.remove(group);
        }
    }

    pub(crate) fn queries(&self) -> Vec<EventsQuery> {
        self.state.lock().unwrap().queries.clone()
    }

    pub(crate) fn list_streams_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().list_streams_calls.clone()
    }

    /// Highest number of overlapping event requests seen for one stream.
    pub(crate) fn max_in_flight(&self, stream: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_in_flight
            .get(stream)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of overlapping event requests seen overall.
    pub(crate) fn max_total_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_total_in_flight
    }
}

#[async_trait]
impl LogsApi for FakeLogsApi {
    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>, ClientError> {
        let state = self.state.lock().unwrap();
        if state.fail_list_groups {
            return Err(unavailable("DescribeLogGroups"));
        }
        Ok(state.groups.clone())
    }

    async fn list_streams(&self, group_name: &str) -> Result<Vec<StreamDescriptor>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.list_streams_calls.push(group_name.to_string());
        if state.fail_list_streams.contains(group_name) {
            return Err(unavailable("DescribeLogStreams"));
        }
        Ok(state.streams.get(group_name).cloned().unwrap_or_default())
    }

    async fn get_events(&self, query: &EventsQuery) -> Result<EventPage, ClientError> {
        let (scripted, call) = {
            let mut state = self.state.lock().unwrap();
            state.queries.push(query.clone());

            let in_flight = state.in_flight.entry(query.stream_name.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_in_flight.entry(query.stream_name.clone()).or_default();
            *max = (*max).max(current);
            state.total_in_flight += 1;
            state.max_total_in_flight = state.max_total_in_flight.max(state.total_in_flight);

            let key = (query.group_name.clone(), query.stream_name.clone());
            let scripted = state
                .pages
                .get_mut(&key)
                .and_then(|pages| pages.pop_front())
                .unwrap_or(Some(Vec::new()));
            (scripted, state.queries.len())
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state.lock().unwrap();
            if let Some(in_flight) = state.in_flight.get_mut(&query.stream_name) {
                *in_flight -= 1;
            }
            state.total_in_flight -= 1;
        }

        match scripted {
            Some(events) => Ok(EventPage {
                events,
                next_token: Some(format!("f/{}", call)),
            }),
            None => Err(unavailable("GetLogEvents")),
        }
    }
}

//! Paginated, checkpointed event retrieval for a single stream.
//!
//! A fetch covers the window `[lower_bound, upper_bound)` where the upper
//! bound is fixed to "now" when the fetch starts, so events arriving while
//! pages are being pulled wait for the next tick. The checkpoint is not
//! touched here: the caller commits the returned [`FetchedWindow`] once the
//! events are safely written.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::{ClientError, LogsApi};
use crate::config::DEFAULT_PAGE_LIMIT;
use crate::model::{now_millis, Event, EventsQuery, StreamLease};

/// All events of one fetch window, not yet committed.
#[derive(Debug)]
#[must_use = "a window advances nothing until it is committed"]
pub struct FetchedWindow {
    /// Events in arrival order across pages
    pub events: Vec<Event>,
    pub lower_bound: i64,
    pub upper_bound: i64,
    /// Number of page requests issued
    pub pages: usize,
}

impl FetchedWindow {
    /// Advance the stream's checkpoint to the window's upper bound.
    pub fn commit(self, lease: &mut StreamLease) {
        lease.advance(self.upper_bound);
    }
}

/// Pulls every page of new events for a stream.
pub struct Fetcher {
    api: Arc<dyn LogsApi>,
    page_limit: usize,
}

impl Fetcher {
    pub fn new(api: Arc<dyn LogsApi>, page_limit: usize) -> Self {
        Self {
            api,
            page_limit: page_limit.max(1),
        }
    }

    pub fn with_defaults(api: Arc<dyn LogsApi>) -> Self {
        Self::new(api, DEFAULT_PAGE_LIMIT)
    }

    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Retrieve every event produced since the stream's lower bound.
    ///
    /// Pages are requested until one comes back with fewer than
    /// `page_limit` events. Every request carries the full filter plus the
    /// continuation token. Any page failure aborts the whole window.
    pub async fn fetch_new_events(&self, lease: &StreamLease) -> Result<FetchedWindow, ClientError> {
        let stream = lease.stream();
        let upper_bound = now_millis();
        let lower_bound = lease.effective_lower_bound();

        let mut query = EventsQuery {
            group_name: stream.group().to_string(),
            stream_name: stream.name().to_string(),
            start_time: lower_bound,
            end_time: upper_bound,
            limit: self.page_limit,
            next_token: None,
        };

        let mut events = Vec::new();
        let mut pages = 0;

        loop {
            let page = self.api.get_events(&query).await?;
            pages += 1;

            let page_len = page.events.len();
            events.extend(page.events);

            if page_len < self.page_limit {
                break;
            }

            match page.next_token {
                Some(token) if query.next_token.as_deref() != Some(token.as_str()) => {
                    query.next_token = Some(token);
                }
                _ => {
                    warn!(
                        group = %stream.group(),
                        stream = %stream.name(),
                        pages = pages,
                        "Full page without a new continuation token, ending window"
                    );
                    break;
                }
            }
        }

        debug!(
            group = %stream.group(),
            stream = %stream.name(),
            events = events.len(),
            pages = pages,
            lower_bound = lower_bound,
            upper_bound = upper_bound,
            "Fetched event window"
        );

        Ok(FetchedWindow {
            events,
            lower_bound,
            upper_bound,
            pages,
        })
    }
}

//! Data model for mirrored log resources.
//!
//! Groups and streams share a [`ResourceMeta`] record (id, creation time and
//! the discovered flag) and are compared by id only. A stream's polling state
//! lives in a [`Cursor`] behind a per-stream async mutex; holding a
//! [`StreamLease`] is the only way to read the effective lower bound or to
//! advance the checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Current wall-clock time as a millisecond epoch timestamp.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Shared identity and discovery state of a group or stream.
#[derive(Debug)]
pub struct ResourceMeta {
    id: String,
    creation_time: i64,
    discovered: AtomicBool,
}

impl ResourceMeta {
    pub fn new(id: impl Into<String>, creation_time: i64) -> Self {
        Self {
            id: id.into(),
            creation_time,
            discovered: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered.load(Ordering::Acquire)
    }

    pub fn mark_discovered(&self) {
        self.discovered.store(true, Ordering::Release);
    }

    pub fn clear_discovered(&self) {
        self.discovered.store(false, Ordering::Release);
    }
}

/// Anything the inventory differ can key by id.
///
/// Listing descriptors implement only the identity half; the discovered flag
/// methods default to no-ops for them.
pub trait Resource {
    fn id(&self) -> &str;

    fn creation_time(&self) -> i64;

    fn is_discovered(&self) -> bool {
        false
    }

    fn mark_discovered(&self) {}

    fn clear_discovered(&self) {}
}

impl<T: Resource + ?Sized> Resource for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn creation_time(&self) -> i64 {
        (**self).creation_time()
    }

    fn is_discovered(&self) -> bool {
        (**self).is_discovered()
    }

    fn mark_discovered(&self) {
        (**self).mark_discovered()
    }

    fn clear_discovered(&self) {
        (**self).clear_discovered()
    }
}

/// A log group as returned by the group listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDescriptor {
    /// Unique resource identifier (ARN)
    #[serde(rename = "arn")]
    pub id: String,

    /// Group name, unique within the account
    #[serde(rename = "logGroupName")]
    pub name: String,

    /// Creation time in milliseconds since the epoch
    pub creation_time: i64,

    /// Bytes stored in the group, if reported
    #[serde(default)]
    pub stored_bytes: Option<u64>,

    /// Number of metric filters attached to the group, if reported
    #[serde(default)]
    pub metric_filter_count: Option<u32>,
}

impl Resource for GroupDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn creation_time(&self) -> i64 {
        self.creation_time
    }
}

/// A log stream as returned by the per-group stream listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Unique resource identifier (ARN)
    #[serde(rename = "arn")]
    pub id: String,

    /// Stream name, unique within its group
    #[serde(rename = "logStreamName")]
    pub name: String,

    /// Creation time in milliseconds since the epoch
    pub creation_time: i64,

    #[serde(default)]
    pub first_event_timestamp: Option<i64>,

    #[serde(default)]
    pub last_event_timestamp: Option<i64>,

    #[serde(default)]
    pub last_ingestion_time: Option<i64>,

    #[serde(default)]
    pub stored_bytes: Option<u64>,
}

impl Resource for StreamDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn creation_time(&self) -> i64 {
        self.creation_time
    }
}

/// A single log event. Never retained beyond one fetch/write cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub timestamp: i64,
    pub message: String,
    #[serde(default)]
    pub ingestion_time: i64,
}

impl Event {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            ingestion_time: timestamp,
        }
    }
}

/// One page of events plus the token for the following page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub next_token: Option<String>,
}

/// Filter for a single event page request.
///
/// The full filter is sent on every page; `next_token` is `None` only for
/// the first page of a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsQuery {
    pub group_name: String,
    pub stream_name: String,
    /// Inclusive lower bound (ms epoch)
    pub start_time: i64,
    /// Exclusive upper bound (ms epoch)
    pub end_time: i64,
    pub limit: usize,
    pub next_token: Option<String>,
}

/// Mutable polling state of a stream.
#[derive(Debug)]
pub struct Cursor {
    checkpoint: i64,
}

/// A log stream and its polling state.
#[derive(Debug)]
pub struct Stream {
    meta: ResourceMeta,
    name: String,
    group: String,
    pub first_event_timestamp: Option<i64>,
    pub last_event_timestamp: Option<i64>,
    pub last_ingestion_time: Option<i64>,
    cursor: Arc<Mutex<Cursor>>,
    /// Set while a poll task is waiting for the lease
    queued: AtomicBool,
}

impl Stream {
    /// Build a stream whose checkpoint starts at `checkpoint`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        group: impl Into<String>,
        creation_time: i64,
        checkpoint: i64,
    ) -> Self {
        Self {
            meta: ResourceMeta::new(id, creation_time),
            name: name.into(),
            group: group.into(),
            first_event_timestamp: None,
            last_event_timestamp: None,
            last_ingestion_time: None,
            cursor: Arc::new(Mutex::new(Cursor { checkpoint })),
            queued: AtomicBool::new(false),
        }
    }

    /// Build a stream from its listing; the checkpoint starts at "now" so
    /// events already present are not replayed.
    pub fn from_descriptor(descriptor: StreamDescriptor, group: &str) -> Self {
        let mut stream = Self::new(
            descriptor.id,
            descriptor.name,
            group,
            descriptor.creation_time,
            now_millis(),
        );
        stream.first_event_timestamp = descriptor.first_event_timestamp;
        stream.last_event_timestamp = descriptor.last_event_timestamp;
        stream.last_ingestion_time = descriptor.last_ingestion_time;
        stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Enter the stream's critical section, waiting for any in-flight poll.
    ///
    /// Acquiring the lease clears the queued marker.
    pub async fn lock(self: &Arc<Self>) -> StreamLease {
        let cursor = self.cursor.clone().lock_owned().await;
        self.clear_queued();
        StreamLease {
            stream: Arc::clone(self),
            cursor,
        }
    }

    /// Claim the single waiting slot ahead of the lease.
    ///
    /// Returns `false` if a poll is already waiting for this stream, in
    /// which case a new one would only repeat its window.
    pub fn try_enqueue(&self) -> bool {
        self.queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a poll is waiting for the lease.
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// Release the waiting slot without taking the lease.
    pub fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Read the checkpoint, waiting for any in-flight poll to finish.
    pub async fn checkpoint(&self) -> i64 {
        self.cursor.lock().await.checkpoint
    }
}

impl Resource for Stream {
    fn id(&self) -> &str {
        self.meta.id()
    }

    fn creation_time(&self) -> i64 {
        self.meta.creation_time()
    }

    fn is_discovered(&self) -> bool {
        self.meta.is_discovered()
    }

    fn mark_discovered(&self) {
        self.meta.mark_discovered()
    }

    fn clear_discovered(&self) {
        self.meta.clear_discovered()
    }
}

/// Exclusive access to one stream's checkpoint.
///
/// At most one lease per stream exists at a time; it is held across
/// fetch, write and advance.
pub struct StreamLease {
    stream: Arc<Stream>,
    cursor: OwnedMutexGuard<Cursor>,
}

impl StreamLease {
    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn checkpoint(&self) -> i64 {
        self.cursor.checkpoint
    }

    /// Lower bound for the next fetch.
    ///
    /// A newly discovered stream is read from its creation time. Reading the
    /// flag here does not consume it: it stays set until
    /// [`advance`](Self::advance) commits a window, so a failed first fetch
    /// retries the same backfill window instead of jumping to the checkpoint.
    pub fn effective_lower_bound(&self) -> i64 {
        if self.stream.is_discovered() {
            self.stream.creation_time()
        } else {
            self.cursor.checkpoint
        }
    }

    /// Move the checkpoint to `new_checkpoint` and consume the discovered flag.
    ///
    /// Only call this once every event below `new_checkpoint` has been
    /// written. The checkpoint never moves backwards.
    pub fn advance(&mut self, new_checkpoint: i64) {
        if new_checkpoint >= self.cursor.checkpoint {
            self.cursor.checkpoint = new_checkpoint;
        } else {
            debug!(
                stream_id = %self.stream.id(),
                checkpoint = self.cursor.checkpoint,
                rejected = new_checkpoint,
                "Ignoring checkpoint regression"
            );
        }
        self.stream.clear_discovered();
    }
}

/// A log group and the streams it owns.
#[derive(Debug)]
pub struct Group {
    meta: ResourceMeta,
    name: String,
    pub stored_bytes: Option<u64>,
    pub metric_filter_count: Option<u32>,
    pub(crate) streams: Vec<Arc<Stream>>,
}

impl Group {
    pub fn new(descriptor: GroupDescriptor, streams: Vec<Arc<Stream>>) -> Self {
        Self {
            meta: ResourceMeta::new(descriptor.id, descriptor.creation_time),
            name: descriptor.name,
            stored_bytes: descriptor.stored_bytes,
            metric_filter_count: descriptor.metric_filter_count,
            streams,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }
}

impl Resource for Group {
    fn id(&self) -> &str {
        self.meta.id()
    }

    fn creation_time(&self) -> i64 {
        self.meta.creation_time()
    }

    fn is_discovered(&self) -> bool {
        self.meta.is_discovered()
    }

    fn mark_discovered(&self) {
        self.meta.mark_discovered()
    }

    fn clear_discovered(&self) {
        self.meta.clear_discovered()
    }
}

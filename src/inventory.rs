//! Live inventory of groups and streams.
//!
//! Reconciliation is a read-only [`diff`] keyed by resource id followed by
//! [`Delta::apply`], which builds a fresh list: resources present on both
//! sides are carried over as the same objects (checkpoints intact), new ones
//! are appended with their discovered flag set, and vanished ones dropped.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{ClientError, LogsApi};
use crate::model::{Group, GroupDescriptor, Resource, Stream};

/// Id-level difference between a known list and a fresh listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    added: Vec<String>,
    removed: Vec<String>,
    kept: usize,
}

/// Compare `previous` against `current` by id without touching either.
///
/// Added ids follow `current` order, removed ids follow `previous` order.
/// Duplicate ids in `current` count once.
pub fn diff<P: Resource, C: Resource>(previous: &[P], current: &[C]) -> Delta {
    let known: HashSet<&str> = previous.iter().map(|r| r.id()).collect();
    let listed: HashSet<&str> = current.iter().map(|r| r.id()).collect();

    let mut seen = HashSet::new();
    let added = current
        .iter()
        .map(|r| r.id())
        .filter(|id| !known.contains(id) && seen.insert(*id))
        .map(str::to_string)
        .collect();

    let removed = previous
        .iter()
        .map(|r| r.id())
        .filter(|id| !listed.contains(id))
        .map(str::to_string)
        .collect::<Vec<_>>();

    Delta {
        added,
        kept: previous.len() - removed.len(),
        removed,
    }
}

impl Delta {
    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    pub fn kept(&self) -> usize {
        self.kept
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Pick the added items out of the listing, first occurrence of each id.
    pub fn added_from<C: Resource>(&self, current: Vec<C>) -> Vec<C> {
        let mut wanted: HashSet<&str> = self.added.iter().map(String::as_str).collect();
        current
            .into_iter()
            .filter(|r| wanted.remove(r.id()))
            .collect()
    }

    /// Build the reconciled list: surviving `previous` items in their
    /// original order, then `added` marked as discovered.
    pub fn apply<T: Resource>(&self, previous: Vec<T>, added: Vec<T>) -> Vec<T> {
        let removed: HashSet<&str> = self.removed.iter().map(String::as_str).collect();
        let mut result: Vec<T> = previous
            .into_iter()
            .filter(|r| !removed.contains(r.id()))
            .collect();

        for resource in added {
            resource.mark_discovered();
            result.push(resource);
        }
        result
    }
}

/// Reconcile a known list against freshly built resources.
///
/// Existing objects whose id is still listed are kept as-is; the fresh
/// duplicates for them are discarded.
pub fn reconcile<T: Resource>(previous: Vec<T>, current: Vec<T>) -> (Vec<T>, Delta) {
    let delta = diff(&previous, &current);
    let added = delta.added_from(current);
    let result = delta.apply(previous, added);
    (result, delta)
}

/// What one refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub groups_added: usize,
    pub groups_removed: usize,
    pub streams_added: usize,
    pub streams_removed: usize,
    /// Groups whose stream listing failed and were left unchanged
    pub failed_groups: Vec<String>,
}

impl RefreshSummary {
    pub fn is_unchanged(&self) -> bool {
        self.groups_added == 0
            && self.groups_removed == 0
            && self.streams_added == 0
            && self.streams_removed == 0
    }
}

/// Every known group and its streams.
#[derive(Debug, Default)]
pub struct Inventory {
    groups: Vec<Group>,
}

impl Inventory {
    /// Build the initial inventory. Nothing is marked discovered: every
    /// stream starts from "now".
    pub async fn bootstrap(api: &dyn LogsApi) -> Result<Self, ClientError> {
        let listed = api.list_groups().await?;
        let delta = diff::<Group, _>(&[], &listed);

        let mut groups = Vec::with_capacity(listed.len());
        for descriptor in delta.added_from(listed) {
            groups.push(discover_group(api, descriptor).await?);
        }

        let streams: usize = groups.iter().map(|g| g.streams.len()).sum();
        info!(groups = groups.len(), streams = streams, "Inventory loaded");

        Ok(Self { groups })
    }

    /// Reconcile against the live listings.
    ///
    /// The group-level pass is all-or-nothing: if the group listing or any
    /// new group's stream listing fails, the inventory is left untouched.
    /// Stream-level passes are all-or-nothing per group. Groups discovered
    /// in this pass are not re-diffed; their initial listing stands.
    pub async fn refresh(&mut self, api: &dyn LogsApi) -> Result<RefreshSummary, ClientError> {
        let listed = api.list_groups().await?;
        let delta = diff(&self.groups, &listed);

        let mut added = Vec::with_capacity(delta.added().len());
        for descriptor in delta.added_from(listed) {
            added.push(discover_group(api, descriptor).await?);
        }

        let mut summary = RefreshSummary {
            groups_added: added.len(),
            groups_removed: delta.removed().len(),
            ..RefreshSummary::default()
        };

        for group in &self.groups {
            if delta.removed().iter().any(|id| id == group.id()) {
                info!(group = %group.name(), streams = group.streams.len(), "Group removed");
            }
        }

        self.groups = delta.apply(std::mem::take(&mut self.groups), added);

        for group in &mut self.groups {
            if group.is_discovered() {
                continue;
            }

            match api.list_streams(group.name()).await {
                Ok(descriptors) => {
                    let current: Vec<Arc<Stream>> = descriptors
                        .into_iter()
                        .map(|d| Arc::new(Stream::from_descriptor(d, group.name())))
                        .collect();
                    let (streams, delta) = reconcile(std::mem::take(&mut group.streams), current);
                    group.streams = streams;

                    for id in delta.added() {
                        info!(group = %group.name(), stream_id = %id, "Stream discovered");
                    }
                    for id in delta.removed() {
                        info!(group = %group.name(), stream_id = %id, "Stream removed");
                    }
                    summary.streams_added += delta.added().len();
                    summary.streams_removed += delta.removed().len();
                }
                Err(e) => {
                    warn!(
                        group = %group.name(),
                        error = %e,
                        "Stream listing failed, keeping previous streams"
                    );
                    summary.failed_groups.push(group.name().to_string());
                }
            }
        }

        for group in &self.groups {
            group.clear_discovered();
        }

        Ok(summary)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// Every stream of every group.
    pub fn streams(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.groups.iter().flat_map(|g| g.streams.iter())
    }

    pub fn stream_count(&self) -> usize {
        self.groups.iter().map(|g| g.streams.len()).sum()
    }
}

/// Construct a group with its full stream listing.
async fn discover_group(
    api: &dyn LogsApi,
    descriptor: GroupDescriptor,
) -> Result<Group, ClientError> {
    let listed = api.list_streams(&descriptor.name).await?;

    let no_streams: &[Arc<Stream>] = &[];
    let delta = diff(no_streams, &listed);
    let streams: Vec<Arc<Stream>> = delta
        .added_from(listed)
        .into_iter()
        .map(|d| Arc::new(Stream::from_descriptor(d, &descriptor.name)))
        .collect();

    info!(
        group = %descriptor.name,
        streams = streams.len(),
        stored_bytes = ?descriptor.stored_bytes,
        metric_filters = ?descriptor.metric_filter_count,
        "Group discovered"
    );

    Ok(Group::new(descriptor, streams))
}

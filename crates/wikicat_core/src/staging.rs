//! Per-link bookkeeping for changes that are staged but not saved.
//!
//! Each category shown for the page gets a [`LinkRecord`] keyed by a stable
//! [`LinkId`]. A record remembers which batch slot holds its pending change and
//! the name it had before an edit, so one link can be reset without touching
//! any other.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::batch::{EditBatch, PendingOperation, StageHandle};
use crate::title::{NamespaceAliasSet, same_category};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Unchanged,
    Added,
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub id: LinkId,
    pub category: String,
    pub original: Option<String>,
    pub exists: bool,
    pub state: LinkState,
    pub stash: Option<StageHandle>,
}

#[derive(Debug, Default)]
pub struct StagingStore {
    next_id: u64,
    links: BTreeMap<LinkId, LinkRecord>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::new();
        for category in categories {
            store.insert(category, LinkState::Unchanged);
        }
        store
    }

    pub fn insert(&mut self, category: impl Into<String>, state: LinkState) -> LinkId {
        let id = LinkId(self.next_id);
        self.next_id += 1;
        self.links.insert(
            id,
            LinkRecord {
                id,
                category: category.into(),
                original: None,
                exists: true,
                state,
                stash: None,
            },
        );
        id
    }

    pub fn get(&self, id: LinkId) -> Option<&LinkRecord> {
        self.links.get(&id)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut LinkRecord> {
        self.links.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The link currently showing `category`, if any.
    pub fn find(&self, category: &str, namespaces: &NamespaceAliasSet) -> Option<LinkId> {
        self.links
            .values()
            .find(|record| same_category(&record.category, category, namespaces))
            .map(|record| record.id)
    }

    /// Names of every link on display, removed-but-unsaved ones included.
    pub fn categories(&self) -> Vec<String> {
        self.links
            .values()
            .map(|record| record.category.clone())
            .collect()
    }

    pub fn remove(&mut self, id: LinkId) -> Option<LinkRecord> {
        self.links.remove(&id)
    }

    /// Record that `id` now has a staged change sitting in `slot`.
    pub fn mark(&mut self, id: LinkId, state: LinkState, slot: StageHandle) {
        if let Some(record) = self.links.get_mut(&id) {
            record.state = state;
            record.stash = Some(slot);
        }
    }

    /// Show a new name on an existing link, remembering the first original.
    pub fn rename(&mut self, id: LinkId, category: impl Into<String>) {
        if let Some(record) = self.links.get_mut(&id) {
            let previous = std::mem::replace(&mut record.category, category.into());
            record.original.get_or_insert(previous);
        }
    }

    /// Undo the unsaved change on one link and free its batch slot.
    ///
    /// Links that only exist because of a staged add disappear; renamed links
    /// get their original name back.
    pub fn reset(&mut self, id: LinkId, batch: &mut EditBatch) -> Option<PendingOperation> {
        let record = self.links.get_mut(&id)?;
        let cancelled = record.stash.take().and_then(|slot| batch.cancel(slot));
        match record.state {
            LinkState::Added => {
                self.links.remove(&id);
            }
            LinkState::Changed | LinkState::Removed | LinkState::Unchanged => {
                if let Some(original) = record.original.take() {
                    record.category = original;
                }
                record.state = LinkState::Unchanged;
            }
        }
        debug!(link = id.0, cancelled = cancelled.is_some(), "reset category link");
        cancelled
    }

    /// Forget every unsaved change and empty the batch.
    pub fn reset_all(&mut self, batch: &mut EditBatch) -> Vec<PendingOperation> {
        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        let mut cancelled: Vec<PendingOperation> = ids
            .into_iter()
            .filter_map(|id| self.reset(id, batch))
            .collect();
        cancelled.extend(batch.cancel_all());
        cancelled
    }

    /// Make the saved state the new baseline: removed links go away, added
    /// and renamed links become plain links under their new names.
    pub fn settle(&mut self) {
        self.links
            .retain(|_, record| record.state != LinkState::Removed);
        for record in self.links.values_mut() {
            record.state = LinkState::Unchanged;
            record.original = None;
            record.stash = None;
        }
    }
}

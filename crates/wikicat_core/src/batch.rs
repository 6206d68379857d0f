//! Staged category operations applied to one page as a single edit.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{EditFailure, EditResult};
use crate::staging::LinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Edit,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

pub type ModFn = Box<dyn Fn(&str) -> EditResult<String> + Send + Sync>;

/// One text transform waiting to be saved, with the strings shown for it.
pub struct PendingOperation {
    pub kind: OperationKind,
    pub category: String,
    pub summary_fragment: String,
    pub description: String,
    pub link: Option<LinkId>,
    mod_fn: ModFn,
}

impl PendingOperation {
    pub fn new<F>(
        kind: OperationKind,
        category: impl Into<String>,
        summary_fragment: impl Into<String>,
        description: impl Into<String>,
        mod_fn: F,
    ) -> Self
    where
        F: Fn(&str) -> EditResult<String> + Send + Sync + 'static,
    {
        Self {
            kind,
            category: category.into(),
            summary_fragment: summary_fragment.into(),
            description: description.into(),
            link: None,
            mod_fn: Box::new(mod_fn),
        }
    }

    pub fn with_link(mut self, link: LinkId) -> Self {
        self.link = Some(link);
        self
    }

    pub fn apply(&self, text: &str) -> EditResult<String> {
        (self.mod_fn)(text)
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("kind", &self.kind)
            .field("category", &self.category)
            .field("summary_fragment", &self.summary_fragment)
            .field("description", &self.description)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

/// Opaque reference to a staged slot. Never reused within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StageHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub text: String,
    pub summary: String,
    pub description: String,
    pub applied: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("staged change {position} ({summary}) failed: {failure}")]
pub struct BatchFailure {
    pub handle: StageHandle,
    pub position: usize,
    pub summary: String,
    pub failure: EditFailure,
}

/// Operations in staging order, keyed by handle.
///
/// Cancelling removes one slot without shifting any other handle. Commit runs
/// every transform over the output of the previous one.
#[derive(Debug, Default)]
pub struct EditBatch {
    next_handle: u64,
    staged: BTreeMap<StageHandle, PendingOperation>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, operation: PendingOperation) -> StageHandle {
        let handle = StageHandle(self.next_handle);
        self.next_handle += 1;
        info!(
            kind = operation.kind.as_str(),
            category = %operation.category,
            slot = handle.0,
            "staged category change"
        );
        self.staged.insert(handle, operation);
        handle
    }

    pub fn cancel(&mut self, handle: StageHandle) -> Option<PendingOperation> {
        let removed = self.staged.remove(&handle);
        if removed.is_some() {
            debug!(slot = handle.0, remaining = self.staged.len(), "cancelled staged change");
        }
        removed
    }

    pub fn cancel_all(&mut self) -> Vec<PendingOperation> {
        std::mem::take(&mut self.staged).into_values().collect()
    }

    pub fn get(&self, handle: StageHandle) -> Option<&PendingOperation> {
        self.staged.get(&handle)
    }

    pub fn contains(&self, handle: StageHandle) -> bool {
        self.staged.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageHandle, &PendingOperation)> {
        self.staged.iter().map(|(handle, operation)| (*handle, operation))
    }

    /// Short edit summary: fragments joined with `, `.
    pub fn summary(&self) -> String {
        self.staged
            .values()
            .map(|operation| operation.summary_fragment.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Human-readable description, one line per staged change.
    pub fn description(&self) -> String {
        self.staged
            .values()
            .map(|operation| operation.description.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run the composed transform without draining the batch.
    pub fn apply(&self, current_text: &str) -> Result<BatchOutcome, BatchFailure> {
        let mut text = current_text.to_string();
        for (position, (handle, operation)) in self.staged.iter().enumerate() {
            text = operation.apply(&text).map_err(|failure| {
                warn!(slot = handle.0, position, %failure, "staged change failed");
                BatchFailure {
                    handle: *handle,
                    position,
                    summary: operation.summary_fragment.clone(),
                    failure,
                }
            })?;
        }
        Ok(BatchOutcome {
            text,
            summary: self.summary(),
            description: self.description(),
            applied: self.staged.len(),
        })
    }

    /// Apply every staged change and drain the batch. On failure the batch is
    /// left exactly as it was.
    pub fn commit(&mut self, current_text: &str) -> Result<BatchOutcome, BatchFailure> {
        let outcome = self.apply(current_text)?;
        self.staged.clear();
        Ok(outcome)
    }
}

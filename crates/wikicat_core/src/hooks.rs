use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::error::{EditFailure, EditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    BeforeAdd,
    AfterAdd,
    BeforeChange,
    AfterChange,
    BeforeDelete,
    AfterDelete,
}

impl HookKind {
    pub const ALL: [HookKind; 6] = [
        Self::BeforeAdd,
        Self::AfterAdd,
        Self::BeforeChange,
        Self::AfterChange,
        Self::BeforeDelete,
        Self::AfterDelete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeAdd => "beforeAdd",
            Self::AfterAdd => "afterAdd",
            Self::BeforeChange => "beforeChange",
            Self::AfterChange => "afterChange",
            Self::BeforeDelete => "beforeDelete",
            Self::AfterDelete => "afterDelete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// Returned by a hook to abort the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRejected;

/// `(text, category, new_category)` to transformed text. `new_category` is only
/// set for the change hooks.
pub type Hook =
    Box<dyn Fn(&str, &str, Option<&str>) -> Result<String, HookRejected> + Send + Sync>;

/// Ordered text hooks per extension point.
#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<HookKind, Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: HookKind, hook: F)
    where
        F: Fn(&str, &str, Option<&str>) -> Result<String, HookRejected> + Send + Sync + 'static,
    {
        self.hooks.entry(kind).or_default().push(Box::new(hook));
    }

    pub fn count(&self, kind: HookKind) -> usize {
        self.hooks.get(&kind).map_or(0, Vec::len)
    }

    /// Thread `text` through every hook of `kind` in registration order,
    /// stopping at the first rejection.
    pub fn run(
        &self,
        kind: HookKind,
        text: String,
        category: &str,
        new_category: Option<&str>,
    ) -> EditResult<String> {
        let Some(hooks) = self.hooks.get(&kind) else {
            return Ok(text);
        };
        let mut text = text;
        for (position, hook) in hooks.iter().enumerate() {
            text = hook(&text, category, new_category).map_err(|HookRejected| {
                warn!(hook = kind.as_str(), position, category, "hook rejected change");
                EditFailure::hook_aborted(category)
            })?;
        }
        Ok(text)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, hooks) in &self.hooks {
            map.entry(&kind.as_str(), &hooks.len());
        }
        map.finish()
    }
}

use serde::Serialize;
use thiserror::Error;

/// Recoverable failure of a category operation.
///
/// Every engine entry point returns these as values. None of them leaves the
/// page text, the staged batch, or the link table in a modified state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditFailure {
    #[error("\"{input}\" is not a valid category name")]
    InvalidTitle { input: String },
    #[error("the category \"{category}\" is already present on this page")]
    DuplicateCategory { category: String },
    #[error(
        "the category \"{category}\" could not be found in the page text; it may be added by a template"
    )]
    CategoryNotFound { category: String },
    #[error("a hook aborted the change to category \"{category}\"")]
    HookAborted { category: String },
    #[error("the page was changed by someone else since it was loaded")]
    RemoteConflict,
    #[error("wiki API error [{code}]: {info}")]
    RemoteError { code: String, info: String },
    #[error("network failure: {detail}")]
    NetworkFailure { detail: String },
    #[error("category editing is not enabled for \"{page}\" (namespace {namespace})")]
    NamespaceDisabled { page: String, namespace: i32 },
}

impl EditFailure {
    pub fn invalid_title(input: impl Into<String>) -> Self {
        Self::InvalidTitle {
            input: input.into(),
        }
    }

    pub fn duplicate(category: impl Into<String>) -> Self {
        Self::DuplicateCategory {
            category: category.into(),
        }
    }

    pub fn not_found(category: impl Into<String>) -> Self {
        Self::CategoryNotFound {
            category: category.into(),
        }
    }

    pub fn hook_aborted(category: impl Into<String>) -> Self {
        Self::HookAborted {
            category: category.into(),
        }
    }

    pub fn remote(code: impl Into<String>, info: impl Into<String>) -> Self {
        Self::RemoteError {
            code: code.into(),
            info: info.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::NetworkFailure {
            detail: detail.into(),
        }
    }

    pub fn namespace_disabled(page: impl Into<String>, namespace: i32) -> Self {
        Self::NamespaceDisabled {
            page: page.into(),
            namespace,
        }
    }

    /// Failures raised by the wiki round trip rather than by the text engine.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteConflict | Self::RemoteError { .. } | Self::NetworkFailure { .. }
        )
    }
}

pub type EditResult<T> = std::result::Result<T, EditFailure>;

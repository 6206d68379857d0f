//! A wiki collaborator backed by wikitext held in memory, used for local files.
//!
//! Categories are read from the text itself, redirects are not followed and
//! every "submit" simply replaces the held text.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::api::{CategoryLookupApi, PageEditApi, PageInfo, PageRevision, ResolvedCategory};
use crate::error::EditResult;
use crate::matcher::scan_categories;
use crate::title::{NamespaceAliasSet, clean_prefix, same_category};

#[derive(Debug, Clone)]
pub struct LocalPage {
    path: Option<PathBuf>,
    namespace: i32,
    namespaces: NamespaceAliasSet,
    original: String,
    text: String,
    submissions: Vec<String>,
}

impl LocalPage {
    pub fn from_text(text: impl Into<String>, namespaces: NamespaceAliasSet) -> Self {
        let text = text.into();
        Self {
            path: None,
            namespace: 0,
            namespaces,
            original: text.clone(),
            text,
            submissions: Vec::new(),
        }
    }

    pub fn read(path: &Path, namespaces: NamespaceAliasSet) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut page = Self::from_text(text, namespaces);
        page.path = Some(path.to_path_buf());
        Ok(page)
    }

    pub fn with_namespace(mut self, namespace: i32) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_modified(&self) -> bool {
        self.text != self.original
    }

    pub fn submissions(&self) -> &[String] {
        &self.submissions
    }

    /// Write the current text back to the file it was read from.
    pub fn write_back(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.is_modified() {
            return Ok(false);
        }
        fs::write(path, &self.text).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(true)
    }

    fn title(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|stem| stem.to_string_lossy().replace('_', " "))
            .unwrap_or_else(|| "(text)".to_string())
    }

    fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for category in scan_categories(&self.text, &self.namespaces) {
            if !out
                .iter()
                .any(|seen| same_category(seen, &category.name, &self.namespaces))
            {
                out.push(category.name);
            }
        }
        out
    }
}

impl PageEditApi for LocalPage {
    fn login(&mut self, _username: &str, _password: &str) -> EditResult<()> {
        Ok(())
    }

    fn fetch_current_text(&mut self, page: &str) -> EditResult<PageRevision> {
        Ok(PageRevision {
            title: page.to_string(),
            namespace: self.namespace,
            text: self.text.clone(),
            edit_token: String::new(),
            base_timestamp: None,
        })
    }

    fn submit_text(
        &mut self,
        page: &str,
        text: &str,
        summary: &str,
        _edit_token: &str,
        _base_timestamp: Option<&str>,
    ) -> EditResult<()> {
        debug!(page, summary, bytes = text.len(), "replaced local page text");
        self.text = text.to_string();
        self.submissions.push(summary.to_string());
        Ok(())
    }
}

impl CategoryLookupApi for LocalPage {
    fn resolve(&mut self, category: &str) -> EditResult<ResolvedCategory> {
        Ok(ResolvedCategory::passthrough(category))
    }

    fn suggest(&mut self, prefix: &str, limit: usize) -> EditResult<Vec<String>> {
        let prefix = clean_prefix(prefix).to_lowercase();
        Ok(self
            .categories()
            .into_iter()
            .filter(|name| clean_prefix(name).to_lowercase().starts_with(&prefix))
            .take(limit)
            .collect())
    }

    fn page_info(&mut self, _page: &str) -> EditResult<PageInfo> {
        Ok(PageInfo {
            title: self.title(),
            namespace: self.namespace,
            categories: self.categories(),
        })
    }

    fn category_namespaces(&mut self) -> EditResult<NamespaceAliasSet> {
        Ok(self.namespaces.clone())
    }

    fn request_count(&self) -> usize {
        0
    }
}

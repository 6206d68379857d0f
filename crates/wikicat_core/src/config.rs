use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::title::NamespaceAliasSet;

pub const DEFAULT_USER_AGENT: &str = "wikicat/0.1";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub categorizer: CategorizerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CategorizerSection {
    #[serde(default = "default_true")]
    pub multi_edit: bool,
    #[serde(default = "default_true")]
    pub resolve_redirects: bool,
    /// Empty means "ask the wiki".
    #[serde(default)]
    pub category_aliases: Vec<String>,
    #[serde(default)]
    pub case_sensitive_namespace: bool,
    #[serde(default)]
    pub enabled_namespaces: Vec<i32>,
    pub summary_suffix: Option<String>,
}

impl Default for CategorizerSection {
    fn default() -> Self {
        Self {
            multi_edit: true,
            resolve_redirects: true,
            category_aliases: Vec::new(),
            case_sensitive_namespace: false,
            enabled_namespaces: Vec::new(),
            summary_suffix: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl WikiConfig {
    /// Resolve the wiki API URL with owned return: env > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve the wiki base URL: env WIKI_URL > config > derived from api_url.
    pub fn wiki_url(&self) -> Option<String> {
        if let Some(value) = env_override("WIKI_URL") {
            return Some(value);
        }
        if let Some(ref url) = self.wiki.url {
            return Some(url.clone());
        }
        self.api_url_owned().and_then(|api| derive_wiki_url(&api))
    }

    /// Article URL of `title` under the resolved wiki base URL.
    pub fn page_url(&self, title: &str) -> Option<String> {
        self.wiki_url().map(|base| page_url_for(&base, title))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Bot credentials from WIKI_BOT_USER / WIKI_BOT_PASS, when both are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        Some((env_override("WIKI_BOT_USER")?, env_override("WIKI_BOT_PASS")?))
    }

    /// Configured category namespace names, or `None` to discover them.
    pub fn category_namespaces(&self) -> Option<NamespaceAliasSet> {
        if self.categorizer.category_aliases.is_empty() {
            return None;
        }
        Some(NamespaceAliasSet::new(
            &self.categorizer.category_aliases,
            self.categorizer.case_sensitive_namespace,
        ))
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct CategorizerConfigPatch {
    pub set_category_aliases: Option<Vec<String>>,
    pub set_case_sensitive_namespace: Option<bool>,
}

/// Update selected keys under `[categorizer]` while preserving all other
/// config sections. Returns `true` when a write occurred.
pub fn patch_categorizer_config(config_path: &Path, patch: &CategorizerConfigPatch) -> Result<bool> {
    if patch.set_category_aliases.is_none() && patch.set_case_sensitive_namespace.is_none() {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let section = root_table
        .entry("categorizer".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let section = section.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!("[categorizer] must be a table in {}", config_path.display())
    })?;

    if let Some(aliases) = &patch.set_category_aliases {
        if aliases.is_empty() {
            section.remove("category_aliases");
        } else {
            let array = aliases
                .iter()
                .map(|alias| Value::String(alias.clone()))
                .collect();
            section.insert("category_aliases".to_string(), Value::Array(array));
        }
    }
    if let Some(case_sensitive) = patch.set_case_sensitive_namespace {
        section.insert(
            "case_sensitive_namespace".to_string(),
            Value::Boolean(case_sensitive),
        );
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

/// Derive wiki base URL from an API URL by stripping `/api.php` or `/w/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// `<base>/wiki/<Title_with_underscores>`.
pub fn page_url_for(base: &str, title: &str) -> String {
    format!(
        "{}/wiki/{}",
        base.trim_end_matches('/'),
        title.trim().replace(' ', "_")
    )
}

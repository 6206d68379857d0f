use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".wikicat";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\nconfig_path={} ({})\nconfig_exists={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.config_path.exists()
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("WIKICAT_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

/// Write the commented default config unless one exists (or `force`).
pub fn materialize_config(paths: &ResolvedPaths, force: bool) -> Result<bool> {
    write_text_file(&paths.config_path, &render_default_config(), force)
}

pub fn render_default_config() -> String {
    format!(
        "# wikicat configuration (materialized by `wikicat init`)\n\n[wiki]\n# url = \"https://your-wiki.example.org\"\n# api_url = \"https://your-wiki.example.org/api.php\"\n# user_agent = \"{}\"\n\n[categorizer]\nmulti_edit = true\nresolve_redirects = true\n# Leave empty to read the namespace names from the wiki:\n# category_aliases = [\"Category\"]\ncase_sensitive_namespace = false\n# Namespaces where category editing is allowed; empty allows all.\nenabled_namespaces = []\n# summary_suffix = \"via wikicat\"\n",
        crate::config::DEFAULT_USER_AGENT
    )
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("WIKICAT_PROJECT_ROOT") {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    match detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref()) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    candidate_roots(cwd, executable_dir)
        .into_iter()
        .filter(|candidate| seen.insert(normalize_for_display(candidate)))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = cwd.ancestors().map(Path::to_path_buf).collect();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

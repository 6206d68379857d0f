use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use similar::TextDiff;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikicat_core::api::{
    CategoryLookupApi, MediaWikiClient, MediaWikiClientConfig, PageEditApi, PageInfo,
    PageRevision, ResolvedCategory,
};
use wikicat_core::config::{CategorizerConfigPatch, WikiConfig, load_config, patch_categorizer_config};
use wikicat_core::error::EditResult;
use wikicat_core::hooks::HookRegistry;
use wikicat_core::local::LocalPage;
use wikicat_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, materialize_config, normalize_for_display,
    resolve_paths,
};
use wikicat_core::session::{Categorizer, CategorizerOptions, ChangeOutcome, SaveReport};
use wikicat_core::staging::LinkRecord;
use wikicat_core::title::NamespaceAliasSet;

#[derive(Debug, Parser)]
#[command(
    name = "wikicat",
    version,
    about = "Add, rename and remove the categories of a wiki page"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "More log output on stderr (-v info, -vv debug)")]
    verbose: u8,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Write a default .wikicat/config.toml")]
    Init(InitArgs),
    #[command(about = "Change the categories of a page on the wiki")]
    Apply(ApplyArgs),
    #[command(about = "Change the categories of a local wikitext file")]
    File(FileArgs),
    #[command(about = "List existing categories starting with a prefix")]
    Suggest(SuggestArgs),
    #[command(about = "Show the category namespace names in use")]
    Namespaces(NamespacesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct ChangeArgs {
    #[arg(long = "add", value_name = "NAME[|SORT]", help = "Category to add")]
    add: Vec<String>,
    #[arg(long = "change", value_name = "OLD=NEW[|SORT]", help = "Category to rename")]
    change: Vec<String>,
    #[arg(long = "remove", value_name = "NAME", help = "Category to remove")]
    remove: Vec<String>,
    #[arg(long, value_name = "TEXT", help = "Appended to the edit summary")]
    reason: Option<String>,
    #[arg(long, help = "Show the resulting diff without saving")]
    dry_run: bool,
    #[arg(long, help = "Save every change as its own edit")]
    single: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    page: String,
    #[command(flatten)]
    changes: ChangeArgs,
}

#[derive(Debug, Args)]
struct FileArgs {
    path: PathBuf,
    #[arg(long, default_value_t = 0, help = "Namespace id the file's page belongs to")]
    namespace: i32,
    #[command(flatten)]
    changes: ChangeArgs,
}

#[derive(Debug, Args)]
struct SuggestArgs {
    prefix: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct NamespacesArgs {
    #[arg(long, help = "Store the discovered names in the config file")]
    save: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestedChange {
    Add(String),
    Change { old: String, new: String },
    Remove(String),
}

impl RequestedChange {
    fn label(&self) -> String {
        match self {
            Self::Add(name) => format!("add {name}"),
            Self::Change { old, new } => format!("change {old} -> {new}"),
            Self::Remove(name) => format!("remove {name}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChangeLine {
    change: String,
    outcome: Option<ChangeOutcome>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApplyReport<'a> {
    page: &'a str,
    url: Option<&'a str>,
    dry_run: bool,
    changes: &'a [ChangeLine],
    save: Option<&'a SaveReport>,
    links: Vec<&'a LinkRecord>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Apply(args)) => run_apply(&runtime, args),
        Some(Commands::File(args)) => run_file(&runtime, args),
        Some(Commands::Suggest(args)) => run_suggest(&runtime, args),
        Some(Commands::Namespaces(args)) => run_namespaces(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let (paths, _) = load_runtime(runtime)?;
    let wrote = materialize_config(&paths, args.force)?;

    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("wrote_config: {}", format_flag(wrote));
    if !wrote {
        println!("note: config already exists (use --force to overwrite)");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_apply(runtime: &RuntimeOptions, args: ApplyArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let requested = requested_changes(&args.changes)?;
    let mut client = connect(&config)?;
    let namespaces = category_namespaces(&config, &mut client)?;
    let options = session_options(&config, &args.changes);

    let preview = Preview::new(client, args.changes.dry_run);
    let mut session = Categorizer::open(
        preview,
        &args.page,
        namespaces,
        HookRegistry::new(),
        options,
    )
    .with_context(|| format!("cannot edit categories of {}", args.page))?;
    session.set_reason(args.changes.reason.clone());

    let lines = run_changes(&mut session, &requested);
    info!(page = %session.page(), staged = session.batch().len(), "saving category changes");
    let save = session
        .save_all()
        .with_context(|| format!("failed to save categories of {}", session.page()))?;

    let preview = session.api();
    let diff = preview
        .original
        .as_deref()
        .zip(preview.proposed.as_deref());
    let url = config.page_url(session.page());
    print_report(
        &session,
        url.as_deref(),
        &lines,
        &save,
        args.changes.dry_run,
        args.changes.json,
    )?;
    if !args.changes.json {
        if args.changes.dry_run
            && let Some((before, after)) = diff
        {
            print_diff(session.page(), before, after);
        }
        println!("requests: {}", preview.inner.request_count());
    }
    print_diagnostics(runtime, &paths);
    finish(&lines)
}

fn run_file(runtime: &RuntimeOptions, args: FileArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let requested = requested_changes(&args.changes)?;
    let namespaces = config.category_namespaces().unwrap_or_default();
    let page = LocalPage::read(&args.path, namespaces.clone())?.with_namespace(args.namespace);
    let mut options = session_options(&config, &args.changes);
    options.resolve_redirects = false;

    let title = args
        .path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_else(|| normalize_path(&args.path));
    let mut session = Categorizer::open(page, &title, namespaces, HookRegistry::new(), options)
        .with_context(|| format!("cannot edit categories of {}", args.path.display()))?;
    session.set_reason(args.changes.reason.clone());

    let lines = run_changes(&mut session, &requested);
    let save = session.save_all().with_context(|| {
        format!("failed to apply category changes to {}", args.path.display())
    })?;

    print_report(
        &session,
        None,
        &lines,
        &save,
        args.changes.dry_run,
        args.changes.json,
    )?;
    let page = session.api();
    if args.changes.dry_run {
        if !args.changes.json && page.is_modified() {
            print_diff(&normalize_path(&args.path), page.original(), page.text());
        }
    } else {
        let wrote = page.write_back()?;
        if !args.changes.json {
            println!("wrote_file: {}", format_flag(wrote));
        }
    }
    print_diagnostics(runtime, &paths);
    finish(&lines)
}

fn run_suggest(runtime: &RuntimeOptions, args: SuggestArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut client = connect(&config)?;
    let suggestions = client
        .suggest(&args.prefix, args.limit)
        .with_context(|| format!("failed to look up categories starting with {}", args.prefix))?;

    println!("prefix: {}", args.prefix);
    println!("matches: {}", suggestions.len());
    for name in &suggestions {
        println!("  - {name}");
    }
    println!("requests: {}", client.request_count());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_namespaces(runtime: &RuntimeOptions, args: NamespacesArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let (namespaces, source) = match config.category_namespaces() {
        Some(namespaces) if !args.save => (namespaces, "config"),
        _ => {
            let mut client = connect(&config)?;
            let namespaces = client
                .category_namespaces()
                .context("failed to read namespace names from the wiki")?;
            (namespaces, "wiki")
        }
    };

    println!("source: {source}");
    println!("display_name: {}", namespaces.display_name());
    println!("case_sensitive: {}", format_flag(namespaces.case_sensitive()));
    for alias in namespaces.aliases() {
        println!("  - {alias}");
    }
    if args.save {
        let wrote = patch_categorizer_config(
            &paths.config_path,
            &CategorizerConfigPatch {
                set_category_aliases: Some(namespaces.aliases().to_vec()),
                set_case_sensitive_namespace: Some(namespaces.case_sensitive()),
            },
        )?;
        println!("config_path: {}", normalize_path(&paths.config_path));
        println!("wrote_config: {}", format_flag(wrote));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_changes<A>(session: &mut Categorizer<A>, requested: &[RequestedChange]) -> Vec<ChangeLine>
where
    A: PageEditApi + CategoryLookupApi,
{
    requested
        .iter()
        .map(|change| {
            let result = match change {
                RequestedChange::Add(name) => session.add(name),
                RequestedChange::Change { old, new } => session.edit(old, new),
                RequestedChange::Remove(name) => session.delete(name),
            };
            match result {
                Ok(outcome) => ChangeLine {
                    change: change.label(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(error) => ChangeLine {
                    change: change.label(),
                    outcome: None,
                    error: Some(error.to_string()),
                },
            }
        })
        .collect()
}

fn print_report<A>(
    session: &Categorizer<A>,
    url: Option<&str>,
    lines: &[ChangeLine],
    save: &SaveReport,
    dry_run: bool,
    json: bool,
) -> Result<()>
where
    A: PageEditApi + CategoryLookupApi,
{
    if json {
        let report = ApplyReport {
            page: session.page(),
            url,
            dry_run,
            changes: lines,
            save: Some(save),
            links: session.links().collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("page: {}", session.page());
    if let Some(url) = url {
        println!("url: {url}");
    }
    println!("namespace: {}", session.namespace());
    println!("dry_run: {}", format_flag(dry_run));
    for line in lines {
        match (&line.outcome, &line.error) {
            (Some(outcome), _) => println!("{}: {}", line.change, describe_outcome(outcome)),
            (None, Some(error)) => println!("{}: failed ({error})", line.change),
            (None, None) => println!("{}: skipped", line.change),
        }
    }
    if save.applied > 0 {
        println!("summary: {}", save.summary);
        println!("applied: {}", save.applied);
    }
    println!("changed: {}", format_flag(save.changed));
    println!("categories:");
    for link in session.links() {
        let marker = if link.exists { "" } else { " (missing category page)" };
        println!("  - {}{marker}", link.category);
    }
    Ok(())
}

fn describe_outcome(outcome: &ChangeOutcome) -> &'static str {
    match outcome {
        ChangeOutcome::Staged { .. } => "staged",
        ChangeOutcome::Saved(report) if report.changed => "saved",
        ChangeOutcome::Saved(_) => "no change",
        ChangeOutcome::Reset { .. } => "cancelled pending change",
        ChangeOutcome::Unchanged => "unchanged",
    }
}

fn print_diff(label: &str, before: &str, after: &str) {
    let diff = TextDiff::from_lines(before, after);
    print!(
        "{}",
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{label}"), &format!("b/{label}"))
    );
}

fn finish(lines: &[ChangeLine]) -> Result<()> {
    let failed = lines.iter().filter(|line| line.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} requested change(s) could not be applied");
    }
    Ok(())
}

fn requested_changes(args: &ChangeArgs) -> Result<Vec<RequestedChange>> {
    let mut out = Vec::new();
    out.extend(args.add.iter().cloned().map(RequestedChange::Add));
    for value in &args.change {
        let Some((old, new)) = value.split_once('=') else {
            bail!("--change expects OLD=NEW, got `{value}`");
        };
        if old.trim().is_empty() || new.trim().is_empty() {
            bail!("--change expects OLD=NEW, got `{value}`");
        }
        out.push(RequestedChange::Change {
            old: old.to_string(),
            new: new.to_string(),
        });
    }
    out.extend(args.remove.iter().cloned().map(RequestedChange::Remove));
    if out.is_empty() {
        bail!("nothing to do: pass at least one --add, --change or --remove");
    }
    Ok(out)
}

fn session_options(config: &WikiConfig, args: &ChangeArgs) -> CategorizerOptions {
    let mut options = CategorizerOptions::from_config(config);
    if args.single {
        options.multi_edit = false;
    }
    options
}

fn connect(config: &WikiConfig) -> Result<MediaWikiClient> {
    let client_config = MediaWikiClientConfig::from_config(config);
    if client_config.api_url.trim().is_empty() {
        bail!("no wiki API configured: set WIKI_API_URL or [wiki].api_url");
    }
    info!(api_url = %client_config.api_url, "connecting to wiki");
    let mut client = MediaWikiClient::new(client_config)?;
    if let Some((username, password)) = config.credentials() {
        client
            .login(&username, &password)
            .with_context(|| format!("failed to log in as {username}"))?;
    }
    Ok(client)
}

fn category_namespaces(config: &WikiConfig, client: &mut MediaWikiClient) -> Result<NamespaceAliasSet> {
    match config.category_namespaces() {
        Some(namespaces) => Ok(namespaces),
        None => client
            .category_namespaces()
            .context("failed to read namespace names from the wiki"),
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, WikiConfig)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Wraps the wiki client so that nothing is written in dry-run mode.
///
/// Submitted text is kept and served back by later fetches, so single-edit
/// runs still see their own earlier changes.
struct Preview<A> {
    inner: A,
    dry_run: bool,
    original: Option<String>,
    proposed: Option<String>,
}

impl<A> Preview<A> {
    fn new(inner: A, dry_run: bool) -> Self {
        Self {
            inner,
            dry_run,
            original: None,
            proposed: None,
        }
    }
}

impl<A: PageEditApi> PageEditApi for Preview<A> {
    fn login(&mut self, username: &str, password: &str) -> EditResult<()> {
        self.inner.login(username, password)
    }

    fn fetch_current_text(&mut self, page: &str) -> EditResult<PageRevision> {
        let mut revision = self.inner.fetch_current_text(page)?;
        self.original.get_or_insert_with(|| revision.text.clone());
        if self.dry_run
            && let Some(proposed) = &self.proposed
        {
            revision.text = proposed.clone();
        }
        Ok(revision)
    }

    fn submit_text(
        &mut self,
        page: &str,
        text: &str,
        summary: &str,
        edit_token: &str,
        base_timestamp: Option<&str>,
    ) -> EditResult<()> {
        self.proposed = Some(text.to_string());
        if self.dry_run {
            return Ok(());
        }
        self.inner
            .submit_text(page, text, summary, edit_token, base_timestamp)
    }
}

impl<A: CategoryLookupApi> CategoryLookupApi for Preview<A> {
    fn resolve(&mut self, category: &str) -> EditResult<ResolvedCategory> {
        self.inner.resolve(category)
    }

    fn suggest(&mut self, prefix: &str, limit: usize) -> EditResult<Vec<String>> {
        self.inner.suggest(prefix, limit)
    }

    fn page_info(&mut self, page: &str) -> EditResult<PageInfo> {
        self.inner.page_info(page)
    }

    fn category_namespaces(&mut self) -> EditResult<NamespaceAliasSet> {
        self.inner.category_namespaces()
    }

    fn request_count(&self) -> usize {
        self.inner.request_count()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeArgs, Preview, RequestedChange, requested_changes};
    use wikicat_core::api::{CategoryLookupApi, PageEditApi};
    use wikicat_core::hooks::HookRegistry;
    use wikicat_core::local::LocalPage;
    use wikicat_core::session::{Categorizer, CategorizerOptions};
    use wikicat_core::title::NamespaceAliasSet;

    fn change_args(add: &[&str], change: &[&str], remove: &[&str]) -> ChangeArgs {
        let owned = |values: &[&str]| values.iter().map(|value| (*value).to_string()).collect();
        ChangeArgs {
            add: owned(add),
            change: owned(change),
            remove: owned(remove),
            reason: None,
            dry_run: false,
            single: false,
            json: false,
        }
    }

    #[test]
    fn requested_changes_keep_add_change_remove_order() {
        let args = change_args(&["A|key"], &["Old=New|k"], &["Gone"]);
        let changes = requested_changes(&args).expect("parse");
        assert_eq!(
            changes,
            [
                RequestedChange::Add("A|key".to_string()),
                RequestedChange::Change {
                    old: "Old".to_string(),
                    new: "New|k".to_string()
                },
                RequestedChange::Remove("Gone".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_change_is_rejected() {
        let error = requested_changes(&change_args(&[], &["OnlyOld"], &[])).expect_err("bad");
        assert!(error.to_string().contains("OLD=NEW"));
        let error = requested_changes(&change_args(&[], &[], &[])).expect_err("empty");
        assert!(error.to_string().contains("nothing to do"));
    }

    #[test]
    fn preview_keeps_changes_local_in_dry_run() {
        let page = LocalPage::from_text("Body\n[[Category:Old]]\n", NamespaceAliasSet::default());
        let options = CategorizerOptions {
            multi_edit: false,
            ..CategorizerOptions::default()
        };
        let mut session = Categorizer::open(
            Preview::new(page, true),
            "Page",
            NamespaceAliasSet::default(),
            HookRegistry::new(),
            options,
        )
        .expect("open");
        session.add("Fresh").expect("add");
        session.edit("Old", "New").expect("edit");

        let preview = session.api();
        assert_eq!(preview.original.as_deref(), Some("Body\n[[Category:Old]]\n"));
        assert_eq!(
            preview.proposed.as_deref(),
            Some("Body\n[[Category:New]]\n[[Category:Fresh]]\n")
        );
        assert_eq!(preview.inner.text(), "Body\n[[Category:Old]]\n");
        assert_eq!(preview.request_count(), 0);
    }

    #[test]
    fn preview_passes_writes_through_when_live() {
        let page = LocalPage::from_text("Body\n", NamespaceAliasSet::default());
        let mut preview = Preview::new(page, false);
        preview
            .submit_text("Page", "Body\n[[Category:A]]\n", "+[[Category:A]]", "", None)
            .expect("submit");
        assert_eq!(preview.inner.text(), "Body\n[[Category:A]]\n");
        assert_eq!(preview.proposed.as_deref(), Some("Body\n[[Category:A]]\n"));
    }
}

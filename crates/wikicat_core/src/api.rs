use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EditFailure, EditResult};
use crate::title::{NS_CATEGORY, NamespaceAliasSet, clean_prefix};

/// Page text plus what is needed to save over it without losing other edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRevision {
    pub title: String,
    pub namespace: i32,
    pub text: String,
    pub edit_token: String,
    pub base_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub title: String,
    pub namespace: i32,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCategory {
    pub canonical_name: String,
    pub exists: bool,
    pub redirected_from: Option<String>,
}

impl ResolvedCategory {
    pub fn passthrough(name: &str) -> Self {
        Self {
            canonical_name: name.to_string(),
            exists: true,
            redirected_from: None,
        }
    }
}

pub trait PageEditApi {
    fn login(&mut self, username: &str, password: &str) -> EditResult<()>;
    fn fetch_current_text(&mut self, page: &str) -> EditResult<PageRevision>;
    fn submit_text(
        &mut self,
        page: &str,
        text: &str,
        summary: &str,
        edit_token: &str,
        base_timestamp: Option<&str>,
    ) -> EditResult<()>;
}

pub trait CategoryLookupApi {
    fn resolve(&mut self, category: &str) -> EditResult<ResolvedCategory>;
    fn suggest(&mut self, prefix: &str, limit: usize) -> EditResult<Vec<String>>;
    fn page_info(&mut self, page: &str) -> EditResult<PageInfo>;
    fn category_namespaces(&mut self) -> EditResult<NamespaceAliasSet>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::WikiConfig) -> Self {
        let api_default = config.api_url_owned().unwrap_or_default();
        Self::from_env_with_defaults(&api_default, &config.user_agent())
    }

    fn from_env_with_defaults(api_url_default: &str, user_agent_default: &str) -> Self {
        Self {
            api_url: env_value("WIKI_API_URL", api_url_default),
            user_agent: env_value("WIKI_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> EditResult<Value> {
        let pairs = request_pairs(params);
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        return Err(http_failure(status));
                    }
                    let payload: Value = response.json().map_err(|error| {
                        EditFailure::remote("baddata", format!("undecodable API response: {error}"))
                    })?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(EditFailure::network(error.to_string()));
                }
            }
        }

        Err(EditFailure::network("MediaWiki API request exhausted retry budget"))
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> EditResult<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = request_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        return Err(http_failure(status));
                    }
                    let payload: Value = response.json().map_err(|error| {
                        EditFailure::remote("baddata", format!("undecodable API response: {error}"))
                    })?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(EditFailure::network(error.to_string()));
                }
            }
        }

        Err(EditFailure::network("MediaWiki API request exhausted retry budget"))
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = rand::thread_rng().gen_range(0..100u64);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        warn!(attempt, delay_ms = delay, "retrying MediaWiki API request");
        sleep(Duration::from_millis(delay));
    }
}

impl PageEditApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> EditResult<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = decode(token_response, "login token")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| EditFailure::remote("notoken", "failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse = decode(login_response, "login")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => Ok(()),
            other => Err(EditFailure::remote(
                "loginfailed",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    fn fetch_current_text(&mut self, page: &str) -> EditResult<PageRevision> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", page.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp".to_string()),
            ("rvslots", "main".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        parse_page_revision(response)
    }

    fn submit_text(
        &mut self,
        page: &str,
        text: &str,
        summary: &str,
        edit_token: &str,
        base_timestamp: Option<&str>,
    ) -> EditResult<()> {
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", page.to_string()),
                ("text", text.to_string()),
                ("summary", summary.to_string()),
                ("basetimestamp", base_timestamp.unwrap_or_default().to_string()),
                ("nocreate", "1".to_string()),
                ("token", edit_token.to_string()),
            ],
            true,
        );
        match response {
            Ok(payload) => parse_edit_result(payload, page),
            Err(EditFailure::RemoteError { code, .. }) if code == "editconflict" => {
                Err(EditFailure::RemoteConflict)
            }
            Err(error) => Err(error),
        }
    }
}

impl CategoryLookupApi for MediaWikiClient {
    fn resolve(&mut self, category: &str) -> EditResult<ResolvedCategory> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", format!("Category:{category}")),
            ("redirects", "1".to_string()),
        ])?;
        parse_resolved_category(response, category)
    }

    fn suggest(&mut self, prefix: &str, limit: usize) -> EditResult<Vec<String>> {
        let prefix = clean_prefix(prefix);
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("list", "allpages".to_string()),
            ("apnamespace", NS_CATEGORY.to_string()),
            ("apprefix", prefix),
            ("aplimit", limit.max(1).to_string()),
        ])?;
        let parsed: QueryResponse = decode(response, "allpages")?;
        Ok(parsed
            .query
            .allpages
            .into_iter()
            .map(|item| strip_namespace(&item.title).to_string())
            .collect())
    }

    fn page_info(&mut self, page: &str) -> EditResult<PageInfo> {
        let mut info: Option<PageInfo> = None;
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("titles", page.to_string()),
                ("prop", "categories".to_string()),
                ("cllimit", "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("clcontinue", token.clone()));
            }
            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = decode(response, "page categories")?;
            let Some(item) = parsed.query.pages.into_iter().next() else {
                return Err(EditFailure::remote("missingtitle", format!("no page data for {page}")));
            };
            if item.missing.unwrap_or(false) {
                return Err(EditFailure::remote(
                    "missingtitle",
                    format!("the page {page} does not exist"),
                ));
            }
            let entry = info.get_or_insert_with(|| PageInfo {
                title: item.title.clone(),
                namespace: item.ns,
                categories: Vec::new(),
            });
            entry.categories.extend(
                item.categories
                    .iter()
                    .map(|category| strip_namespace(&category.title).to_string()),
            );

            continue_token = parsed.continuation.and_then(|cont| cont.clcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        info.ok_or_else(|| EditFailure::remote("missingtitle", format!("no page data for {page}")))
    }

    fn category_namespaces(&mut self) -> EditResult<NamespaceAliasSet> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "namespaces|namespacealiases".to_string()),
        ])?;
        parse_category_namespaces(&response)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Parameters sent even when empty, so a blanked page still carries `text=`.
const ALWAYS_SENT_PARAMS: &[&str] = &["text"];

fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() || ALWAYS_SENT_PARAMS.contains(key) {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> EditResult<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        debug!(code, info, "MediaWiki API reported an error");
        return Err(EditFailure::remote(code, info));
    }
    Ok(payload)
}

fn http_failure(status: StatusCode) -> EditFailure {
    EditFailure::network(format!("MediaWiki API request failed with HTTP {status}"))
}

fn decode<T: for<'de> Deserialize<'de>>(payload: Value, what: &str) -> EditResult<T> {
    serde_json::from_value(payload).map_err(|error| {
        EditFailure::remote("baddata", format!("failed to decode {what} response: {error}"))
    })
}

fn parse_page_revision(payload: Value) -> EditResult<PageRevision> {
    let parsed: QueryResponse = decode(payload, "page content")?;
    let edit_token = parsed
        .query
        .tokens
        .and_then(|tokens| tokens.csrftoken)
        .ok_or_else(|| EditFailure::remote("notoken", "failed to get MediaWiki csrf token"))?;
    let page = parsed
        .query
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| EditFailure::remote("missingtitle", "no page returned"))?;
    if page.missing.unwrap_or(false) {
        return Err(EditFailure::remote(
            "missingtitle",
            format!("the page {} does not exist", page.title),
        ));
    }
    let revision = page.revisions.into_iter().next();
    let text = revision
        .as_ref()
        .and_then(|revision| revision.slots.as_ref())
        .and_then(|slots| slots.main.as_ref())
        .map(|slot| slot.content.clone())
        .unwrap_or_default();

    Ok(PageRevision {
        title: page.title,
        namespace: page.ns,
        text,
        edit_token,
        base_timestamp: revision.map(|revision| revision.timestamp),
    })
}

fn parse_edit_result(payload: Value, page: &str) -> EditResult<()> {
    let parsed: EditResponse = decode(payload, "edit")?;
    let edit = parsed
        .edit
        .ok_or_else(|| EditFailure::remote("baddata", "missing edit payload in API response"))?;
    match edit.result.as_deref() {
        Some("Success") => Ok(()),
        other => Err(EditFailure::remote(
            "editfailed",
            format!("edit of {page} returned {}", other.unwrap_or("unknown")),
        )),
    }
}

fn parse_resolved_category(payload: Value, requested: &str) -> EditResult<ResolvedCategory> {
    let parsed: QueryResponse = decode(payload, "redirect")?;
    let redirected_from = parsed
        .query
        .redirects
        .first()
        .map(|redirect| strip_namespace(&redirect.from).to_string());
    let Some(page) = parsed.query.pages.into_iter().next() else {
        return Ok(ResolvedCategory::passthrough(requested));
    };
    let canonical_name = if page.ns == NS_CATEGORY {
        strip_namespace(&page.title).to_string()
    } else {
        requested.to_string()
    };
    Ok(ResolvedCategory {
        canonical_name,
        exists: !page.missing.unwrap_or(false),
        redirected_from,
    })
}

/// Category namespace names from a `siteinfo` response: localized name,
/// canonical name, then aliases.
fn parse_category_namespaces(payload: &Value) -> EditResult<NamespaceAliasSet> {
    let query = payload
        .get("query")
        .ok_or_else(|| EditFailure::remote("baddata", "siteinfo response without query"))?;
    let namespace = query
        .get("namespaces")
        .and_then(|namespaces| namespaces.get(NS_CATEGORY.to_string()))
        .ok_or_else(|| EditFailure::remote("baddata", "siteinfo lacks the category namespace"))?;

    let mut names: Vec<String> = Vec::new();
    for key in ["name", "canonical"] {
        if let Some(value) = namespace.get(key).and_then(Value::as_str) {
            names.push(value.to_string());
        }
    }
    if let Some(aliases) = query.get("namespacealiases").and_then(Value::as_array) {
        names.extend(
            aliases
                .iter()
                .filter(|alias| alias.get("id").and_then(Value::as_i64) == Some(i64::from(NS_CATEGORY)))
                .filter_map(|alias| alias.get("alias").and_then(Value::as_str))
                .map(ToString::to_string),
        );
    }
    let case_sensitive = namespace.get("case").and_then(Value::as_str) == Some("case-sensitive");
    Ok(NamespaceAliasSet::new(names, case_sensitive))
}

fn strip_namespace(title: &str) -> &str {
    title.split_once(':').map_or(title, |(_, rest)| rest)
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    clcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RedirectItem {
    from: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    ns: i32,
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

//! Application configuration for SpecPress.
//!
//! User config lives at `~/.specpress/specpress.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecPressError};
use crate::types::RepoCoords;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "specpress.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".specpress";

/// Default record store file name inside the config directory.
const DB_FILE_NAME: &str = "specpress.db";

// ---------------------------------------------------------------------------
// Config structs (matching specpress.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global pipeline defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Crawl service settings.
    #[serde(default)]
    pub crawl: CrawlServiceConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// GitHub publication settings.
    #[serde(default)]
    pub github: GitHubConfig,
}

/// What to do when generation fails for a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Omit the fragment, record it as skipped, and merge the rest.
    #[default]
    Skip,
    /// Fail the whole run on the first chunk failure.
    Abort,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Chunk budget in characters (an approximation of a model token budget).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum number of pages to crawl.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Path pattern (regex) restricting which pages get crawled.
    #[serde(default = "default_path_pattern")]
    pub path_pattern: String,

    /// Maximum concurrent per-chunk generation calls.
    #[serde(default = "default_generation_concurrency")]
    pub generation_concurrency: usize,

    /// Policy for failed per-chunk generation.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Maximum merge prompt size in characters.
    #[serde(default = "default_merge_input_limit")]
    pub merge_input_limit: usize,

    /// Record store path. Defaults to `~/.specpress/specpress.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            page_limit: default_page_limit(),
            path_pattern: default_path_pattern(),
            generation_concurrency: default_generation_concurrency(),
            failure_policy: FailurePolicy::default(),
            merge_input_limit: default_merge_input_limit(),
            database_path: None,
        }
    }
}

fn default_chunk_size() -> usize {
    8190
}
fn default_page_limit() -> u32 {
    3
}
fn default_path_pattern() -> String {
    ".*".into()
}
fn default_generation_concurrency() -> usize {
    4
}
fn default_merge_input_limit() -> usize {
    400_000
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlServiceConfig {
    /// Base URL of the crawl service API.
    #[serde(default = "default_crawl_api_base")]
    pub api_base: String,

    /// Name of the env var holding the crawl API key.
    #[serde(default = "default_crawl_api_key_env")]
    pub api_key_env: String,

    /// Seconds between status checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Hard ceiling on the total wait for a crawl job, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Only keep elements matching these tags/selectors.
    #[serde(default = "default_include_tags")]
    pub include_tags: Vec<String>,

    /// Drop elements matching these tags/selectors.
    #[serde(default = "default_exclude_tags")]
    pub exclude_tags: Vec<String>,

    /// Ask the service to strip page chrome.
    #[serde(default = "default_true")]
    pub only_main_content: bool,
}

impl Default for CrawlServiceConfig {
    fn default() -> Self {
        Self {
            api_base: default_crawl_api_base(),
            api_key_env: default_crawl_api_key_env(),
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            include_tags: default_include_tags(),
            exclude_tags: default_exclude_tags(),
            only_main_content: true,
        }
    }
}

fn default_crawl_api_base() -> String {
    "https://api.firecrawl.dev".into()
}
fn default_crawl_api_key_env() -> String {
    "FIRECRAWL_API_KEY".into()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_poll_timeout() -> u64 {
    600
}
fn default_include_tags() -> Vec<String> {
    vec!["main".into()]
}
fn default_exclude_tags() -> Vec<String> {
    [
        "img",
        "footer",
        "nav",
        "header",
        "#navbar",
        ".table-of-contents-content",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_true() -> bool {
    true
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for fragment generation, merging and formatting.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat-completions API base URL.
    #[serde(default = "default_openrouter_base")]
    pub base_url: String,

    /// Retries for transient failures (429, 5xx, timeouts).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_openrouter_base(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".into()
}
fn default_openrouter_base() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_request_timeout() -> u64 {
    120
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Name of the env var holding the GitHub token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// REST API base URL.
    #[serde(default = "default_github_api")]
    pub api_base: String,

    /// Repository owner (user or organization).
    #[serde(default)]
    pub owner: String,

    /// Repository name.
    #[serde(default)]
    pub repo: String,

    /// Branch the pull request targets.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Prefix of generated branch names.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Directory under which `<integration>/` is created.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// File name of the specification document.
    #[serde(default = "default_spec_file_name")]
    pub spec_file_name: String,

    /// File name of the companion description.
    #[serde(default = "default_companion_file_name")]
    pub companion_file_name: String,

    /// Pass the merged document through the generator once more to normalize
    /// it as YAML before committing.
    #[serde(default = "default_true")]
    pub format_before_publish: bool,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_github_api(),
            owner: String::new(),
            repo: String::new(),
            base_branch: default_base_branch(),
            branch_prefix: default_branch_prefix(),
            path_prefix: default_path_prefix(),
            spec_file_name: default_spec_file_name(),
            companion_file_name: default_companion_file_name(),
            format_before_publish: true,
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_github_api() -> String {
    "https://api.github.com".into()
}
fn default_base_branch() -> String {
    "main".into()
}
fn default_branch_prefix() -> String {
    "open-api-spec-writer".into()
}
fn default_path_prefix() -> String {
    "packages".into()
}
fn default_spec_file_name() -> String {
    "openapi.yaml".into()
}
fn default_companion_file_name() -> String {
    "README.md".into()
}

impl GitHubConfig {
    /// Target repository coordinates, if owner and repo are configured.
    pub fn repo_coords(&self) -> Result<RepoCoords> {
        if self.owner.is_empty() || self.repo.is_empty() {
            return Err(SpecPressError::config(
                "github.owner and github.repo must be set to publish",
            ));
        }
        Ok(RepoCoords {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            base_branch: self.base_branch.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline settings derived from the config file.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunk budget in characters.
    pub chunk_size: usize,
    /// Maximum concurrent generation calls.
    pub generation_concurrency: usize,
    /// Policy for failed per-chunk generation.
    pub failure_policy: FailurePolicy,
    /// Maximum merge prompt size in characters.
    pub merge_input_limit: usize,
    /// Delay between crawl status checks.
    pub poll_interval: Duration,
    /// Hard ceiling on the crawl wait.
    pub poll_timeout: Duration,
    /// Normalize the merged document before committing.
    pub format_before_publish: bool,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.defaults.chunk_size,
            generation_concurrency: config.defaults.generation_concurrency.max(1),
            failure_policy: config.defaults.failure_policy,
            merge_input_limit: config.defaults.merge_input_limit,
            poll_interval: Duration::from_secs(config.crawl.poll_interval_secs),
            poll_timeout: Duration::from_secs(config.crawl.poll_timeout_secs),
            format_before_publish: config.github.format_before_publish,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.specpress/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpecPressError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.specpress/specpress.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the record store path, honouring `defaults.database_path`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.defaults.database_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SpecPressError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SpecPressError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SpecPressError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SpecPressError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SpecPressError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named by the config.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(SpecPressError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

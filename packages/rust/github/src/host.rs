//! The git hosting port and its GitHub REST adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use specpress_shared::{AppConfig, RepoCoords, Result, SpecPressError, read_secret};

/// User-Agent string for GitHub API requests.
const USER_AGENT: &str = concat!("SpecPress/", env!("CARGO_PKG_VERSION"));

/// Repository operations needed to open a pull request.
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Head commit SHA of `branch`, or `None` if the branch does not exist.
    async fn resolve_ref(&self, repo: &RepoCoords, branch: &str) -> Result<Option<String>>;

    /// Create `branch` pointing at `sha`.
    async fn create_branch(&self, repo: &RepoCoords, branch: &str, sha: &str) -> Result<()>;

    /// Create or replace a file on `branch`. `content_base64` is the encoded payload.
    async fn put_file(
        &self,
        repo: &RepoCoords,
        branch: &str,
        path: &str,
        content_base64: &str,
        message: &str,
    ) -> Result<()>;

    /// Open a pull request from `head` into the repository's base branch.
    /// Returns the pull request URL.
    async fn open_pull_request(
        &self,
        repo: &RepoCoords,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String>;
}

/// [`GitHost`] backed by the GitHub REST API.
pub struct GitHubClient {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    html_url: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", token.trim());
        let mut auth = HeaderValue::from_str(&auth)
            .map_err(|_| SpecPressError::config("GitHub token contains invalid characters"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SpecPressError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Build from application config, reading the token from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = read_secret(&config.github.token_env, "GitHub token")?;
        Self::new(&config.github.api_base, &token)
    }

    fn repo_url(&self, repo: &RepoCoords, rest: &str) -> String {
        format!("{}/repos/{}/{}/{rest}", self.api_base, repo.owner, repo.repo)
    }
}

async fn check(step: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SpecPressError::publish(step, format!("HTTP {status}: {body}")))
}

fn transport(step: &'static str) -> impl FnOnce(reqwest::Error) -> SpecPressError {
    move |e| SpecPressError::publish(step, format!("request failed: {e}"))
}

#[async_trait]
impl GitHost for GitHubClient {
    #[instrument(skip_all, fields(repo = %repo, branch = %branch))]
    async fn resolve_ref(&self, repo: &RepoCoords, branch: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.repo_url(repo, &format!("git/ref/heads/{branch}")))
            .send()
            .await
            .map_err(transport("resolve_ref"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: RefResponse = check("resolve_ref", response)
            .await?
            .json()
            .await
            .map_err(|e| SpecPressError::publish("resolve_ref", format!("invalid response: {e}")))?;
        Ok(Some(parsed.object.sha))
    }

    #[instrument(skip_all, fields(repo = %repo, branch = %branch))]
    async fn create_branch(&self, repo: &RepoCoords, branch: &str, sha: &str) -> Result<()> {
        let response = self
            .client
            .post(self.repo_url(repo, "git/refs"))
            .json(&json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()
            .await
            .map_err(transport("create_branch"))?;
        check("create_branch", response).await?;
        debug!("branch created");
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo, branch = %branch, path = %path))]
    async fn put_file(
        &self,
        repo: &RepoCoords,
        branch: &str,
        path: &str,
        content_base64: &str,
        message: &str,
    ) -> Result<()> {
        let response = self
            .client
            .put(self.repo_url(repo, &format!("contents/{path}")))
            .json(&json!({
                "message": message,
                "content": content_base64,
                "branch": branch,
            }))
            .send()
            .await
            .map_err(transport("write_file"))?;
        check("write_file", response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %repo, head = %head))]
    async fn open_pull_request(
        &self,
        repo: &RepoCoords,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.repo_url(repo, "pulls"))
            .json(&json!({
                "title": title,
                "head": head,
                "base": repo.base_branch,
                "body": body,
            }))
            .send()
            .await
            .map_err(transport("open_pull_request"))?;
        let parsed: PullResponse = check("open_pull_request", response)
            .await?
            .json()
            .await
            .map_err(|e| {
                SpecPressError::publish("open_pull_request", format!("invalid response: {e}"))
            })?;
        Ok(parsed.html_url)
    }
}

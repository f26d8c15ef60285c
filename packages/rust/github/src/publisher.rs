//! Branch, commit and pull-request publication of a merged specification.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use specpress_shared::{AppConfig, PullRequestResult, RepoCoords, Result, SpecPressError};

use crate::host::GitHost;

/// Everything needed to publish one specification.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub spec_text: String,
    pub integration_name: String,
    /// Documentation site the specification was generated from.
    pub site_url: String,
    pub repo: RepoCoords,
}

/// Publishes a specification as a pull request.
#[async_trait]
pub trait RepoPublisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<PullRequestResult>;
}

/// Naming and layout of published files and branches.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub branch_prefix: String,
    pub path_prefix: String,
    pub spec_file_name: String,
    pub companion_file_name: String,
}

impl From<&AppConfig> for PublishSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            branch_prefix: config.github.branch_prefix.clone(),
            path_prefix: config.github.path_prefix.clone(),
            spec_file_name: config.github.spec_file_name.clone(),
            companion_file_name: config.github.companion_file_name.clone(),
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// [`RepoPublisher`] that opens a fresh branch per publication.
pub struct PullRequestPublisher {
    host: Arc<dyn GitHost>,
    settings: PublishSettings,
}

impl PullRequestPublisher {
    pub fn new(host: Arc<dyn GitHost>, settings: PublishSettings) -> Self {
        Self { host, settings }
    }

    fn branch_name(&self, slug: &str) -> String {
        format!(
            "{}/{slug}-{}",
            self.settings.branch_prefix.trim_end_matches('/'),
            Uuid::new_v4().simple()
        )
    }

    fn file_path(&self, slug: &str, file_name: &str) -> String {
        let prefix = self.settings.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{slug}/{file_name}")
        } else {
            format!("{prefix}/{slug}/{file_name}")
        }
    }
}

#[async_trait]
impl RepoPublisher for PullRequestPublisher {
    #[instrument(skip_all, fields(repo = %request.repo, integration = %request.integration_name))]
    async fn publish(&self, request: &PublishRequest) -> Result<PullRequestResult> {
        let slug = slugify(&request.integration_name);
        if slug.is_empty() {
            return Err(SpecPressError::publish(
                "validate",
                format!(
                    "integration name '{}' has no usable characters",
                    request.integration_name
                ),
            ));
        }
        let repo = &request.repo;

        // Step 1: base branch head
        let base_sha = self
            .host
            .resolve_ref(repo, &repo.base_branch)
            .await?
            .ok_or_else(|| {
                SpecPressError::publish(
                    "resolve_ref",
                    format!("base branch '{}' not found in {}/{}", repo.base_branch, repo.owner, repo.repo),
                )
            })?;

        // Step 2: working branch
        let branch_name = self.branch_name(&slug);
        self.host.create_branch(repo, &branch_name, &base_sha).await?;
        info!(branch = %branch_name, "created branch");

        // Step 3: files
        let message = format!("Add open api spec from {}", request.site_url);
        let files = [
            (
                self.file_path(&slug, &self.settings.spec_file_name),
                request.spec_text.clone(),
            ),
            (
                self.file_path(&slug, &self.settings.companion_file_name),
                companion_text(&slug, &request.site_url),
            ),
        ];

        let mut files_written = Vec::with_capacity(files.len());
        for (path, content) in &files {
            let encoded = STANDARD.encode(content.as_bytes());
            if let Err(e) = self
                .host
                .put_file(repo, &branch_name, path, &encoded, &message)
                .await
            {
                warn!(branch = %branch_name, "publication failed, branch left in place");
                return Err(e);
            }
            files_written.push(path.clone());
        }

        // Step 4: pull request
        let title = format!("Add open api spec from {} for {slug}", request.site_url);
        let body = format!(
            "Generated OpenAPI specification for `{slug}` from {}.\n\nFiles:\n{}",
            request.site_url,
            files_written
                .iter()
                .map(|p| format!("- `{p}`"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let pr_url = match self
            .host
            .open_pull_request(repo, &branch_name, &title, &body)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(branch = %branch_name, "publication failed, branch left in place");
                return Err(e);
            }
        };

        info!(pr_url = %pr_url, files = files_written.len(), "pull request opened");
        Ok(PullRequestResult {
            branch_name,
            files_written,
            pr_url,
        })
    }
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn companion_text(slug: &str, site_url: &str) -> String {
    format!(
        "# {slug}\n\nThis directory contains the Open API spec for the {slug} integration, \
generated from {site_url}.\n"
    )
}

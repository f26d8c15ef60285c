//! Firecrawl v1 adapter for [`CrawlService`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use specpress_shared::{AppConfig, CrawlStatus, Result, SpecPressError, read_secret};

use crate::service::{CrawlRequest, CrawlService, CrawlStatusReport, CrawledPage};

/// User-Agent string for crawl service requests.
const USER_AGENT: &str = concat!("SpecPress/", env!("CARGO_PKG_VERSION"));

/// Upper bound on `next` links followed for one status check.
const MAX_RESULT_PAGES: usize = 50;

/// Scrape options sent with every submission.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub include_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub only_main_content: bool,
}

impl From<&AppConfig> for CrawlSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            include_tags: config.crawl.include_tags.clone(),
            exclude_tags: config.crawl.exclude_tags.clone(),
            only_main_content: config.crawl.only_main_content,
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// HTTP client for the Firecrawl crawl API.
pub struct FirecrawlService {
    client: Client,
    api_base: String,
    api_key: String,
    settings: CrawlSettings,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    data: Vec<StatusPage>,
    next: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusPage {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
    url: Option<String>,
}

impl FirecrawlService {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        settings: CrawlSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SpecPressError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            settings,
        })
    }

    /// Build from application config, reading the API key from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = read_secret(&config.crawl.api_key_env, "Crawl service API key")?;
        Self::new(&config.crawl.api_base, api_key, CrawlSettings::from(config))
    }

    /// Fetch one status response. Client errors other than 408 and 429 end
    /// the job; everything else is reported as a transient network error.
    async fn fetch_status_page(&self, job_id: &str, url: &str) -> Result<StatusResponse> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| SpecPressError::Network(format!("status request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_fatal_status(status) {
                return Err(SpecPressError::CrawlFailed {
                    job_id: job_id.to_string(),
                    reason: format!("status check returned HTTP {status}: {body}"),
                });
            }
            return Err(SpecPressError::Network(format!(
                "status check returned HTTP {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SpecPressError::Network(format!("invalid status response: {e}")))
    }
}

#[async_trait]
impl CrawlService for FirecrawlService {
    #[instrument(skip_all, fields(site_url = %request.site_url))]
    async fn submit(&self, request: &CrawlRequest) -> Result<String> {
        let body = json!({
            "url": request.site_url.as_str(),
            "limit": request.page_limit,
            "includePaths": [request.path_pattern],
            "scrapeOptions": {
                "formats": ["markdown"],
                "includeTags": self.settings.include_tags,
                "excludeTags": self.settings.exclude_tags,
                "onlyMainContent": self.settings.only_main_content,
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/crawl", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpecPressError::submission(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpecPressError::submission(format!("HTTP {status}: {body}")));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SpecPressError::submission(format!("invalid response: {e}")))?;

        match parsed {
            SubmitResponse {
                success: true,
                id: Some(id),
                ..
            } => Ok(id),
            SubmitResponse { error, .. } => Err(SpecPressError::submission(
                error.unwrap_or_else(|| "service did not accept the crawl".into()),
            )),
        }
    }

    #[instrument(skip_all, fields(job_id = %job_id))]
    async fn status(&self, job_id: &str) -> Result<CrawlStatusReport> {
        let first = self
            .fetch_status_page(job_id, &format!("{}/v1/crawl/{job_id}", self.api_base))
            .await?;

        let status = map_status(&first.status);
        let error = first.error;
        let mut pages = collect_pages(first.data);

        // Completed results may be split across several responses.
        let mut next = first.next.filter(|_| status == CrawlStatus::Completed);
        let mut followed = 0;
        while let Some(url) = next.take() {
            if followed == MAX_RESULT_PAGES {
                warn!(
                    pages_kept = pages.len(),
                    "result pages beyond {MAX_RESULT_PAGES} links not fetched, crawl output truncated"
                );
                break;
            }
            followed += 1;
            let page = self.fetch_status_page(job_id, &url).await?;
            pages.extend(collect_pages(page.data));
            next = page.next;
        }

        Ok(CrawlStatusReport {
            status,
            pages,
            error,
        })
    }
}

fn is_fatal_status(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

fn map_status(raw: &str) -> CrawlStatus {
    match raw {
        "completed" => CrawlStatus::Completed,
        "failed" | "cancelled" => CrawlStatus::Failed,
        "scraping" => CrawlStatus::Scraping,
        "queued" | "pending" => CrawlStatus::Queued,
        other => {
            debug!(status = other, "unrecognized crawl status, treating as in progress");
            CrawlStatus::Scraping
        }
    }
}

fn collect_pages(data: Vec<StatusPage>) -> Vec<CrawledPage> {
    data.into_iter()
        .map(|page| {
            let url = page
                .metadata
                .and_then(|m| m.source_url.or(m.url))
                .unwrap_or_default();
            CrawledPage {
                url,
                markdown: page.markdown.unwrap_or_default(),
            }
        })
        .collect()
}

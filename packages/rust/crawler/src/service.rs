//! The crawl service port.

use async_trait::async_trait;
use url::Url;

use specpress_shared::{CrawlStatus, Result};

/// A validated crawl submission.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub site_url: Url,
    /// Regular expression restricting which paths are crawled.
    pub path_pattern: String,
    pub page_limit: u32,
}

/// One page as returned by the crawl service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledPage {
    pub url: String,
    pub markdown: String,
}

/// Result of a single status check.
#[derive(Debug, Clone)]
pub struct CrawlStatusReport {
    pub status: CrawlStatus,
    /// Pages collected so far; complete once `status` is `Completed`.
    pub pages: Vec<CrawledPage>,
    /// Failure reason reported by the service, if any.
    pub error: Option<String>,
}

impl CrawlStatusReport {
    /// A report with no pages.
    pub fn bare(status: CrawlStatus) -> Self {
        Self {
            status,
            pages: Vec::new(),
            error: None,
        }
    }
}

/// External, asynchronous page-collection service.
#[async_trait]
pub trait CrawlService: Send + Sync {
    /// Submit a crawl and return the service's job id.
    async fn submit(&self, request: &CrawlRequest) -> Result<String>;

    /// Check the status of a previously submitted job.
    async fn status(&self, job_id: &str) -> Result<CrawlStatusReport>;
}

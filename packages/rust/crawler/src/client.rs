//! Submission validation and the suspending poll loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, instrument, warn};
use url::Url;

use specpress_shared::{CrawlJob, CrawlStatus, PageRecord, Result, SpecPressError};

use crate::service::{CrawlRequest, CrawlService};

/// Submits crawl jobs and waits for their results.
#[derive(Clone)]
pub struct CrawlJobClient {
    service: Arc<dyn CrawlService>,
}

impl CrawlJobClient {
    pub fn new(service: Arc<dyn CrawlService>) -> Self {
        Self { service }
    }

    /// Validate the request locally, then submit it.
    ///
    /// Every failure, local or remote, is a submission error. Nothing is
    /// retried.
    #[instrument(skip_all, fields(site_url = %site_url, page_limit = page_limit))]
    pub async fn submit(
        &self,
        site_url: &str,
        path_pattern: &str,
        page_limit: u32,
    ) -> Result<CrawlJob> {
        let request = validate_request(site_url, path_pattern, page_limit)?;

        let job_id = self.service.submit(&request).await.map_err(|e| match e {
            SpecPressError::Submission { .. } => e,
            other => SpecPressError::submission(other.to_string()),
        })?;

        info!(job_id = %job_id, "crawl job submitted");
        Ok(CrawlJob::queued(job_id))
    }

    /// Wait until the job reaches a terminal state or `timeout` elapses.
    ///
    /// The first check happens immediately; later checks are spaced by
    /// `interval`. Each status call is bounded by the overall deadline, so a
    /// hung service cannot hold the loop past it. A zero `interval` is
    /// rejected.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn poll(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<PageRecord>> {
        if interval.is_zero() {
            return Err(SpecPressError::validation("poll interval must be positive"));
        }

        let start = Instant::now();
        let deadline = start + timeout;
        let mut job = CrawlJob::queued(job_id);
        let mut checks: u32 = 0;

        loop {
            checks += 1;
            match timeout_at(deadline, self.service.status(job_id)).await {
                Ok(Ok(report)) => {
                    job.observe(report.status);
                    match job.status {
                        CrawlStatus::Completed => {
                            info!(checks, pages = report.pages.len(), "crawl completed");
                            return Ok(into_page_records(report.pages));
                        }
                        CrawlStatus::Failed => {
                            return Err(SpecPressError::CrawlFailed {
                                job_id: job_id.to_string(),
                                reason: report
                                    .error
                                    .unwrap_or_else(|| "crawl service reported failure".into()),
                            });
                        }
                        status => debug!(checks, status = status.as_str(), "crawl in progress"),
                    }
                }
                Ok(Err(SpecPressError::Network(msg))) => {
                    warn!(checks, error = %msg, "status check failed, will check again");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!(checks, "status check cut off by deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SpecPressError::CrawlTimeout {
                    job_id: job_id.to_string(),
                    elapsed: now - start,
                });
            }
            sleep_until((now + interval).min(deadline)).await;
        }
    }
}

/// Check a submission before anything goes over the network.
pub fn validate_request(site_url: &str, path_pattern: &str, page_limit: u32) -> Result<CrawlRequest> {
    let url = Url::parse(site_url)
        .map_err(|e| SpecPressError::submission(format!("invalid site URL '{site_url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SpecPressError::submission(format!(
            "site URL must be http(s) with a host: '{site_url}'"
        )));
    }

    regex::Regex::new(path_pattern).map_err(|e| {
        SpecPressError::submission(format!("invalid path pattern '{path_pattern}': {e}"))
    })?;

    if page_limit == 0 {
        return Err(SpecPressError::submission("page limit must be positive"));
    }

    Ok(CrawlRequest {
        site_url: url,
        path_pattern: path_pattern.to_string(),
        page_limit,
    })
}

fn into_page_records(pages: Vec<crate::service::CrawledPage>) -> Vec<PageRecord> {
    let crawled_at = Utc::now();
    pages
        .into_iter()
        .filter_map(|page| {
            if page.markdown.trim().is_empty() {
                warn!(url = %page.url, "dropping page with empty markdown");
                return None;
            }
            Some(PageRecord {
                source_url: page.url,
                markdown: page.markdown,
                crawled_at,
            })
        })
        .collect()
}

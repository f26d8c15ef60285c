//! End-to-end run: crawl → chunk → generate → merge → publish.
//!
//! [`PipelineOrchestrator`] drives one run through the [`RunState`] machine.
//! Every transition is persisted under the run's id before the stage starts,
//! and a failing stage moves the run to `failed` with the originating error
//! while everything already stored for the run stays in place.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use specpress_crawler::{CrawlJobClient, CrawlService};
use specpress_github::{PublishRequest, RepoPublisher};
use specpress_llm::TextGenerator;
use specpress_shared::{
    MergedSpec, PageRecord, PipelineConfig, PullRequestResult, RepoCoords, Result, RunId,
    RunState, SpecPressError,
};
use specpress_storage::{NewRun, SkippedFragment, Storage};

use crate::chunker;
use crate::fragments::SpecFragmentGenerator;
use crate::merger::{SpecMerger, format_as_yaml};

/// Error kind recorded for runs interrupted by the user.
pub const CANCELLED: &str = "cancelled";

/// What to crawl, and where to publish the result.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub site_url: String,
    /// Regular expression restricting which paths are crawled.
    pub path_pattern: String,
    pub page_limit: u32,
    /// Publish a pull request for this integration. `None` stops after merging.
    pub integration_name: Option<String>,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    pub page_count: usize,
    pub chunk_count: usize,
    pub fragment_count: usize,
    /// Chunks left out of the merge after a generation failure.
    pub skipped: Vec<SkippedFragment>,
    pub merged: MergedSpec,
    pub pull_request: Option<PullRequestResult>,
    pub elapsed: Duration,
}

/// A registered retry run, ready to execute.
#[derive(Debug)]
pub struct RetryPlan {
    pub run_id: RunId,
    pub request: RunRequest,
    pages: Vec<PageRecord>,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called after the run enters a new state.
    fn phase(&self, state: RunState);
    /// Called each time a chunk's generation finishes, successfully or not.
    fn fragment_generated(&self, current: usize, total: usize);
    /// Called when the run succeeds.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _state: RunState) {}
    fn fragment_generated(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}

struct Publication {
    publisher: Arc<dyn RepoPublisher>,
    repo: RepoCoords,
}

/// Drives pipeline runs. All collaborators are injected.
pub struct PipelineOrchestrator {
    crawler: CrawlJobClient,
    generator: Arc<dyn TextGenerator>,
    publication: Option<Publication>,
    storage: Arc<Storage>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        crawl_service: Arc<dyn CrawlService>,
        generator: Arc<dyn TextGenerator>,
        storage: Arc<Storage>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            crawler: CrawlJobClient::new(crawl_service),
            generator,
            publication: None,
            storage,
            config,
        }
    }

    /// Enable the publishing stage against `repo`.
    pub fn with_publisher(mut self, publisher: Arc<dyn RepoPublisher>, repo: RepoCoords) -> Self {
        self.publication = Some(Publication { publisher, repo });
        self
    }

    /// Register a new run in the `submitted` state.
    pub async fn begin(&self, request: &RunRequest) -> Result<RunId> {
        let run_id = RunId::new();
        self.storage
            .insert_run(&NewRun {
                run_id,
                site_url: &request.site_url,
                path_pattern: &request.path_pattern,
                page_limit: request.page_limit,
                integration_name: request.integration_name.as_deref(),
                parent_run_id: None,
            })
            .await?;
        info!(%run_id, site_url = %request.site_url, "run submitted");
        Ok(run_id)
    }

    /// Drive a run registered with [`begin`](Self::begin) to completion.
    pub async fn execute(
        &self,
        run_id: RunId,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let result = self.drive(run_id, request, None, progress).await;
        self.settle(run_id, result).await
    }

    /// [`begin`](Self::begin) then [`execute`](Self::execute).
    pub async fn run(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let run_id = self.begin(request).await?;
        self.execute(run_id, request, progress).await
    }

    /// Start a new run from the pages stored by `source_run_id`, skipping the crawl.
    ///
    /// `integration_name` overrides the source run's integration, if given.
    pub async fn retry_from_pages(
        &self,
        source_run_id: RunId,
        integration_name: Option<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let plan = self.begin_retry(source_run_id, integration_name).await?;
        self.execute_retry(plan, progress).await
    }

    /// Register a retry run and load the pages it will reuse.
    #[instrument(skip_all, fields(source_run_id = %source_run_id))]
    pub async fn begin_retry(
        &self,
        source_run_id: RunId,
        integration_name: Option<String>,
    ) -> Result<RetryPlan> {
        let source = self
            .storage
            .get_run(source_run_id)
            .await?
            .ok_or_else(|| SpecPressError::validation(format!("run {source_run_id} not found")))?;
        let pages = self.storage.list_pages(source_run_id).await?;
        if pages.is_empty() {
            return Err(SpecPressError::validation(format!(
                "run {source_run_id} has no stored pages to retry from"
            )));
        }

        let request = RunRequest {
            site_url: source.site_url,
            path_pattern: source.path_pattern,
            page_limit: source.page_limit,
            integration_name: integration_name.or(source.integration_name),
        };

        let run_id = RunId::new();
        self.storage
            .insert_run(&NewRun {
                run_id,
                site_url: &request.site_url,
                path_pattern: &request.path_pattern,
                page_limit: request.page_limit,
                integration_name: request.integration_name.as_deref(),
                parent_run_id: Some(source_run_id),
            })
            .await?;
        info!(%run_id, pages = pages.len(), "retrying from stored pages");

        Ok(RetryPlan {
            run_id,
            request,
            pages,
        })
    }

    /// Drive a retry registered with [`begin_retry`](Self::begin_retry).
    pub async fn execute_retry(
        &self,
        plan: RetryPlan,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let RetryPlan {
            run_id,
            request,
            pages,
        } = plan;
        let result = self.drive(run_id, &request, Some(pages), progress).await;
        self.settle(run_id, result).await
    }

    /// Record that a run was interrupted before finishing.
    pub async fn mark_cancelled(&self, run_id: RunId) -> Result<()> {
        warn!(%run_id, "run cancelled");
        self.storage
            .fail_run(run_id, CANCELLED, "cancelled by user")
            .await
    }

    /// Publish an existing document, formatting it first if configured.
    #[instrument(skip_all, fields(integration = %integration_name))]
    pub async fn publish_document(
        &self,
        spec_text: &str,
        integration_name: &str,
        site_url: &str,
    ) -> Result<PullRequestResult> {
        let publication = self.publication.as_ref().ok_or_else(|| {
            SpecPressError::config("publishing requested but no repository is configured")
        })?;

        let spec_text = if self.config.format_before_publish {
            format_as_yaml(self.generator.as_ref(), spec_text).await?
        } else {
            spec_text.to_string()
        };

        publication
            .publisher
            .publish(&PublishRequest {
                spec_text,
                integration_name: integration_name.to_string(),
                site_url: site_url.to_string(),
                repo: publication.repo.clone(),
            })
            .await
    }

    /// Persist a failure; pass the result through.
    async fn settle(&self, run_id: RunId, result: Result<RunReport>) -> Result<RunReport> {
        if let Err(e) = &result {
            warn!(%run_id, error = %e, "run failed");
            if let Err(store_err) = self.storage.fail_run(run_id, e.kind(), &e.to_string()).await {
                warn!(%run_id, error = %store_err, "could not record run failure");
            }
        }
        result
    }

    async fn advance(
        &self,
        run_id: RunId,
        state: &mut RunState,
        next: RunState,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        if !state.can_transition_to(next) {
            return Err(SpecPressError::validation(format!(
                "invalid run transition {state} -> {next}"
            )));
        }
        self.storage.set_run_state(run_id, next).await?;
        debug!(%run_id, from = %state, to = %next, "run state changed");
        *state = next;
        progress.phase(next);
        Ok(())
    }

    #[instrument(skip_all, fields(run_id = %run_id, site_url = %request.site_url))]
    async fn drive(
        &self,
        run_id: RunId,
        request: &RunRequest,
        stored_pages: Option<Vec<PageRecord>>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let mut state = RunState::Submitted;

        // --- Crawl (or reuse) ---
        let pages = match stored_pages {
            Some(pages) => {
                self.storage.insert_pages(run_id, &pages).await?;
                pages
            }
            None => {
                self.advance(run_id, &mut state, RunState::Crawling, progress)
                    .await?;
                let job = self
                    .crawler
                    .submit(&request.site_url, &request.path_pattern, request.page_limit)
                    .await?;
                self.storage
                    .set_crawl_job(run_id, &job.external_job_id)
                    .await?;
                let pages = self
                    .crawler
                    .poll(
                        &job.external_job_id,
                        self.config.poll_interval,
                        self.config.poll_timeout,
                    )
                    .await?;
                self.storage.insert_pages(run_id, &pages).await?;
                pages
            }
        };

        // --- Chunk ---
        self.advance(run_id, &mut state, RunState::Chunking, progress)
            .await?;
        let chunks = chunker::chunk_pages(&pages, self.config.chunk_size)?;
        self.storage.insert_chunks(run_id, &chunks).await?;
        info!(pages = pages.len(), chunks = chunks.len(), "pages chunked");

        // --- Generate ---
        self.advance(run_id, &mut state, RunState::Generating, progress)
            .await?;
        let fragment_generator = SpecFragmentGenerator::new(
            self.generator.clone(),
            self.config.generation_concurrency,
            self.config.failure_policy,
        );
        // Whatever was generated is stored, even when generation then fails.
        let (outcome, generated) = fragment_generator
            .generate_collecting(&chunks, progress)
            .await;
        for fragment in &outcome.fragments {
            self.storage.insert_fragment(run_id, fragment).await?;
        }
        for skipped in &outcome.skipped {
            self.storage.insert_skipped_fragment(run_id, skipped).await?;
        }
        generated?;

        // --- Merge ---
        self.advance(run_id, &mut state, RunState::Merging, progress)
            .await?;
        let merged = SpecMerger::new(self.generator.clone(), self.config.merge_input_limit)
            .merge(&outcome.fragments)
            .await?;
        self.storage.set_merged_spec(run_id, &merged.text).await?;

        // --- Publish ---
        let pull_request = match &request.integration_name {
            Some(integration_name) => {
                self.advance(run_id, &mut state, RunState::Publishing, progress)
                    .await?;
                let pr = self
                    .publish_document(&merged.text, integration_name, &request.site_url)
                    .await?;
                self.storage.set_pull_request(run_id, &pr).await?;
                Some(pr)
            }
            None => None,
        };

        self.advance(run_id, &mut state, RunState::Succeeded, progress)
            .await?;

        let report = RunReport {
            run_id,
            state,
            page_count: pages.len(),
            chunk_count: chunks.len(),
            fragment_count: outcome.fragments.len(),
            skipped: outcome.skipped,
            merged,
            pull_request,
            elapsed: start.elapsed(),
        };

        info!(
            pages = report.page_count,
            chunks = report.chunk_count,
            fragments = report.fragment_count,
            skipped = report.skipped.len(),
            pr_url = report.pull_request.as_ref().map(|pr| pr.pr_url.as_str()).unwrap_or("-"),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run succeeded"
        );
        progress.done(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FnGenerator, MemoryHost, StaticCrawl, repo, test_storage};
    use specpress_github::{PublishSettings, PullRequestPublisher};
    use specpress_shared::{AppConfig, FailurePolicy};

    const SITE: &str = "https://docs.example.com/api";

    fn config() -> PipelineConfig {
        PipelineConfig::from(&AppConfig::default())
    }

    fn request(integration: Option<&str>) -> RunRequest {
        RunRequest {
            site_url: SITE.into(),
            path_pattern: "/reference/*".into(),
            page_limit: 3,
            integration_name: integration.map(String::from),
        }
    }

    fn three_pages() -> Arc<StaticCrawl> {
        StaticCrawl::completed(&[
            ("https://docs.example.com/api/reference/users", "# Users\n\nGET /users lists users."),
            ("https://docs.example.com/api/reference/orders", "# Orders\n\nPOST /orders creates an order."),
            ("https://docs.example.com/api/reference/auth", "# Auth\n\nBearer tokens are required."),
        ])
    }

    /// Answers fragment, merge and format prompts differently.
    fn spec_writer() -> Arc<FnGenerator> {
        FnGenerator::new(|prompt| {
            if prompt.starts_with("I have generated") {
                Ok("```yaml\nopenapi: 3.0.0\ninfo:\n  title: Example\npaths: {}\n```".into())
            } else if prompt.starts_with("Format") {
                Ok("openapi: 3.0.0\ninfo:\n  title: Example\npaths: {}\n".into())
            } else {
                Ok("paths:\n  /users: {}".into())
            }
        })
    }

    fn orchestrator(
        crawl: Arc<StaticCrawl>,
        generator: Arc<FnGenerator>,
        storage: Arc<Storage>,
        host: Arc<MemoryHost>,
        config: PipelineConfig,
    ) -> PipelineOrchestrator {
        let publisher = Arc::new(PullRequestPublisher::new(host, PublishSettings::default()));
        PipelineOrchestrator::new(crawl, generator, storage, config).with_publisher(publisher, repo())
    }

    #[tokio::test]
    async fn full_run_opens_pull_request() {
        let storage = test_storage().await;
        let host = Arc::new(MemoryHost::default());
        let crawl = three_pages();
        let orch = orchestrator(crawl.clone(), spec_writer(), storage.clone(), host.clone(), config());

        let report = orch.run(&request(Some("Acme")), &SilentProgress).await.expect("run");

        assert_eq!(report.state, RunState::Succeeded);
        assert_eq!(report.page_count, 3);
        assert!(report.chunk_count >= 3);
        assert_eq!(report.fragment_count, report.chunk_count);
        assert!(report.skipped.is_empty());
        assert_eq!(report.merged.text, "openapi: 3.0.0\ninfo:\n  title: Example\npaths: {}");

        let titles = host.titles.lock().unwrap().clone();
        assert_eq!(titles.len(), 1);
        assert!(titles[0].contains("docs.example.com"));
        let files = host.files.lock().unwrap().clone();
        assert_eq!(files[0].0, "packages/acme/openapi.yaml");
        assert!(files[0].1.starts_with("openapi: 3.0.0"));

        let submitted = crawl.requests.lock().unwrap()[0].clone();
        assert_eq!(submitted.path_pattern, "/reference/*");
        assert_eq!(submitted.page_limit, 3);

        let row = storage.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Succeeded);
        assert_eq!(row.crawl_job_id.as_deref(), Some("job-1"));
        assert_eq!(row.pr_url, report.pull_request.map(|pr| pr.pr_url));
        assert_eq!(storage.list_pages(report.run_id).await.unwrap().len(), 3);
        assert_eq!(
            storage.list_fragments(report.run_id).await.unwrap().len(),
            report.chunk_count
        );
    }

    #[tokio::test]
    async fn without_integration_the_run_stops_after_merging() {
        let storage = test_storage().await;
        let host = Arc::new(MemoryHost::default());
        let orch = orchestrator(three_pages(), spec_writer(), storage.clone(), host.clone(), config());

        let report = orch.run(&request(None), &SilentProgress).await.unwrap();

        assert!(report.pull_request.is_none());
        assert!(host.titles.lock().unwrap().is_empty());
        let row = storage.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Succeeded);
        assert!(row.merged_spec.is_some());
    }

    #[tokio::test]
    async fn crawl_failure_fails_the_run() {
        let storage = test_storage().await;
        let orch = orchestrator(
            StaticCrawl::failing(),
            spec_writer(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            config(),
        );

        let run_id = orch.begin(&request(Some("acme"))).await.unwrap();
        let err = orch
            .execute(run_id, &request(Some("acme")), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "crawl_failed");

        let row = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Failed);
        assert_eq!(row.error_kind.as_deref(), Some("crawl_failed"));
        assert!(row.error_message.unwrap().contains("site unreachable"));
    }

    fn five_chunk_crawl() -> Arc<StaticCrawl> {
        StaticCrawl::completed(&[("https://docs.example.com/api/reference/all", "c0 c1 c2 c3 c4")])
    }

    fn fails_on_c2() -> Arc<FnGenerator> {
        FnGenerator::new(|prompt| {
            if prompt.starts_with("I have generated") {
                Ok("openapi: 3.0.0".into())
            } else if prompt.ends_with("c2") {
                Err(SpecPressError::generation("HTTP 500"))
            } else {
                Ok(format!("fragment {}", &prompt[prompt.len() - 2..]))
            }
        })
    }

    #[tokio::test]
    async fn one_failed_chunk_is_skipped_and_recorded() {
        let storage = test_storage().await;
        let generator = fails_on_c2();
        let mut cfg = config();
        cfg.chunk_size = 2;
        let orch = orchestrator(
            five_chunk_crawl(),
            generator.clone(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            cfg,
        );

        let report = orch.run(&request(None), &SilentProgress).await.unwrap();

        assert_eq!(report.chunk_count, 5);
        assert_eq!(report.fragment_count, 4);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].order, 2);

        let merge_prompt = generator
            .prompts()
            .into_iter()
            .find(|p| p.starts_with("I have generated"))
            .unwrap();
        assert!(merge_prompt.contains("FRAGMENT 4 OF 4"));
        assert!(!merge_prompt.contains("fragment c2"));

        assert_eq!(storage.list_fragments(report.run_id).await.unwrap().len(), 4);
        assert_eq!(storage.list_skipped_fragments(report.run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_failed_chunk_aborts_under_abort_policy() {
        let storage = test_storage().await;
        let mut cfg = config();
        cfg.chunk_size = 2;
        cfg.failure_policy = FailurePolicy::Abort;
        cfg.generation_concurrency = 1;
        let generator = fails_on_c2();
        let orch = orchestrator(
            five_chunk_crawl(),
            generator.clone(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            cfg,
        );

        let run_id = orch.begin(&request(None)).await.unwrap();
        let err = orch.execute(run_id, &request(None), &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), "generation");
        assert!(!generator.prompts().iter().any(|p| p.starts_with("I have generated")));

        let row = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Failed);
        assert!(row.merged_spec.is_none());
        // Upstream records survive the failure.
        assert_eq!(storage.list_chunks(run_id).await.unwrap().len(), 5);
        // So do the fragments finished before the failing chunk.
        let stored: Vec<_> = storage
            .list_fragments(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.order)
            .collect();
        assert_eq!(stored, vec![0, 1]);
    }

    #[tokio::test]
    async fn retry_reuses_stored_pages() {
        let storage = test_storage().await;
        let crawl = three_pages();

        // First attempt: merge fails.
        let broken = FnGenerator::new(|prompt| {
            if prompt.starts_with("I have generated") {
                Err(SpecPressError::generation("context length exceeded"))
            } else {
                Ok("paths: {}".into())
            }
        });
        let first = orchestrator(
            crawl.clone(),
            broken,
            storage.clone(),
            Arc::new(MemoryHost::default()),
            config(),
        );
        let source_run = first.begin(&request(Some("acme"))).await.unwrap();
        let err = first
            .execute(source_run, &request(Some("acme")), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "merge");
        assert_eq!(storage.list_pages(source_run).await.unwrap().len(), 3);

        // Retry with a working generator, without crawling again.
        let host = Arc::new(MemoryHost::default());
        let second = orchestrator(crawl.clone(), spec_writer(), storage.clone(), host.clone(), config());
        let report = second
            .retry_from_pages(source_run, None, &SilentProgress)
            .await
            .expect("retry");

        assert_ne!(report.run_id, source_run);
        assert_eq!(report.page_count, 3);
        assert_eq!(crawl.submits(), 1);
        assert_eq!(host.titles.lock().unwrap().len(), 1);

        let row = storage.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(row.parent_run_id, Some(source_run.to_string()));
        assert_eq!(row.integration_name.as_deref(), Some("acme"));
        assert!(row.crawl_job_id.is_none());
    }

    #[tokio::test]
    async fn registered_retry_can_be_cancelled() {
        let storage = test_storage().await;
        let orch = orchestrator(
            three_pages(),
            spec_writer(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            config(),
        );
        let source = orch.run(&request(None), &SilentProgress).await.unwrap();

        let plan = orch.begin_retry(source.run_id, Some("acme".into())).await.unwrap();
        assert_eq!(plan.request.integration_name.as_deref(), Some("acme"));
        orch.mark_cancelled(plan.run_id).await.unwrap();

        let row = storage.get_run(plan.run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Failed);
        assert_eq!(row.error_kind.as_deref(), Some(CANCELLED));
        assert_eq!(row.parent_run_id, Some(source.run_id.to_string()));
    }

    #[tokio::test]
    async fn retry_of_unknown_run_is_rejected() {
        let storage = test_storage().await;
        let orch = orchestrator(
            three_pages(),
            spec_writer(),
            storage,
            Arc::new(MemoryHost::default()),
            config(),
        );
        let err = orch
            .retry_from_pages(RunId::new(), None, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn publishing_without_repository_fails_the_run() {
        let storage = test_storage().await;
        let orch = PipelineOrchestrator::new(three_pages(), spec_writer(), storage.clone(), config());

        let run_id = orch.begin(&request(Some("acme"))).await.unwrap();
        let err = orch
            .execute(run_id, &request(Some("acme")), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");

        let row = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Failed);
        // The merged document is kept for a later publish.
        assert!(row.merged_spec.is_some());
    }

    #[tokio::test]
    async fn runs_for_the_same_site_are_isolated() {
        let storage = test_storage().await;
        let orch = orchestrator(
            three_pages(),
            spec_writer(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            config(),
        );

        let a = orch.run(&request(None), &SilentProgress).await.unwrap();
        let b = orch.run(&request(None), &SilentProgress).await.unwrap();

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(storage.list_pages(a.run_id).await.unwrap().len(), 3);
        assert_eq!(storage.list_pages(b.run_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_runs_are_marked_failed() {
        let storage = test_storage().await;
        let orch = orchestrator(
            three_pages(),
            spec_writer(),
            storage.clone(),
            Arc::new(MemoryHost::default()),
            config(),
        );

        let run_id = orch.begin(&request(None)).await.unwrap();
        orch.mark_cancelled(run_id).await.unwrap();

        let row = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(row.state, RunState::Failed);
        assert_eq!(row.error_kind.as_deref(), Some(CANCELLED));
    }
}

//! Test doubles shared by the core unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use specpress_crawler::{CrawlRequest, CrawlService, CrawlStatusReport, CrawledPage};
use specpress_github::GitHost;
use specpress_llm::TextGenerator;
use specpress_shared::{CrawlStatus, RepoCoords, Result, RunId, SpecPressError};
use specpress_storage::Storage;

type Respond = dyn Fn(&str) -> Result<String> + Send + Sync;

/// A [`TextGenerator`] answering through a closure and recording prompts.
pub struct FnGenerator {
    respond: Box<Respond>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FnGenerator {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for FnGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        // Let concurrent callers interleave.
        tokio::task::yield_now().await;
        (self.respond)(prompt)
    }
}

/// A crawl service whose jobs finish on the first status check.
pub struct StaticCrawl {
    pages: Vec<CrawledPage>,
    fail: bool,
    pub submits: AtomicUsize,
    pub requests: Mutex<Vec<CrawlRequest>>,
}

impl StaticCrawl {
    pub fn completed(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(url, markdown)| CrawledPage {
                    url: (*url).into(),
                    markdown: (*markdown).into(),
                })
                .collect(),
            fail: false,
            submits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            pages: Vec::new(),
            fail: true,
            submits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrawlService for StaticCrawl {
    async fn submit(&self, request: &CrawlRequest) -> Result<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        Ok("job-1".into())
    }

    async fn status(&self, _job_id: &str) -> Result<CrawlStatusReport> {
        if self.fail {
            return Ok(CrawlStatusReport {
                status: CrawlStatus::Failed,
                pages: Vec::new(),
                error: Some("site unreachable".into()),
            });
        }
        Ok(CrawlStatusReport {
            status: CrawlStatus::Completed,
            pages: self.pages.clone(),
            error: None,
        })
    }
}

/// In-memory git host recording written files and pull-request titles.
#[derive(Default)]
pub struct MemoryHost {
    pub files: Mutex<Vec<(String, String)>>,
    pub titles: Mutex<Vec<String>>,
}

#[async_trait]
impl GitHost for MemoryHost {
    async fn resolve_ref(&self, _repo: &RepoCoords, _branch: &str) -> Result<Option<String>> {
        Ok(Some("base-sha".into()))
    }

    async fn create_branch(&self, _repo: &RepoCoords, _branch: &str, _sha: &str) -> Result<()> {
        Ok(())
    }

    async fn put_file(
        &self,
        _repo: &RepoCoords,
        _branch: &str,
        path: &str,
        content_base64: &str,
        _message: &str,
    ) -> Result<()> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content_base64)
            .map_err(|e| SpecPressError::publish("write_file", e.to_string()))?;
        self.files
            .lock()
            .unwrap()
            .push((path.into(), String::from_utf8_lossy(&decoded).into_owned()));
        Ok(())
    }

    async fn open_pull_request(
        &self,
        repo: &RepoCoords,
        _head: &str,
        title: &str,
        _body: &str,
    ) -> Result<String> {
        let mut titles = self.titles.lock().unwrap();
        titles.push(title.into());
        Ok(format!(
            "https://github.com/{}/{}/pull/{}",
            repo.owner,
            repo.repo,
            titles.len()
        ))
    }
}

pub fn repo() -> RepoCoords {
    RepoCoords {
        owner: "acme".into(),
        repo: "integrations".into(),
        base_branch: "main".into(),
    }
}

/// A fresh temp-file record store.
pub async fn test_storage() -> Arc<Storage> {
    let path = std::env::temp_dir().join(format!("sp_core_test_{}.db", RunId::new()));
    Arc::new(Storage::open(&path).await.expect("open test db"))
}

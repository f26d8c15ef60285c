//! Core domain types for SpecPress pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
///
/// Every invocation gets a fresh id, so two runs against the same site never
/// share records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One crawled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// URL the page was crawled from.
    pub source_url: String,
    /// Page content as Markdown.
    pub markdown: String,
    /// When the crawl service returned the page.
    pub crawled_at: DateTime<Utc>,
}

/// Points a fragment back at the chunk it was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub parent_url: String,
    pub index: usize,
}

/// A bounded-size slice of a page's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Source URL of the page this chunk came from.
    pub parent_url: String,
    /// Position of this chunk within its page.
    pub index: usize,
    /// Chunk text (tokens joined by single spaces).
    pub text: String,
}

impl ChunkRecord {
    /// Reference to this chunk.
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            parent_url: self.parent_url.clone(),
            index: self.index,
        }
    }
}

/// Partial specification produced from a single chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub chunk_ref: ChunkRef,
    pub generated_text: String,
    /// Run-global position of the source chunk; merge input is sorted by this.
    pub order: usize,
}

/// The single document produced by merging every fragment of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedSpec {
    pub text: String,
}

/// Outcome of a successful pull-request publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestResult {
    pub branch_name: String,
    /// Repository paths written on the branch.
    pub files_written: Vec<String>,
    pub pr_url: String,
}

/// Target repository for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCoords {
    pub owner: String,
    pub repo: String,
    /// Branch the pull request targets.
    pub base_branch: String,
}

impl std::fmt::Display for RepoCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.base_branch)
    }
}

// ---------------------------------------------------------------------------
// Crawl job
// ---------------------------------------------------------------------------

/// Status of an external crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Queued,
    Scraping,
    Completed,
    Failed,
}

impl CrawlStatus {
    /// `true` for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scraping => "scraping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An external, asynchronous page-collection task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub external_job_id: String,
    pub status: CrawlStatus,
}

impl CrawlJob {
    /// A freshly submitted job.
    pub fn queued(external_job_id: impl Into<String>) -> Self {
        Self {
            external_job_id: external_job_id.into(),
            status: CrawlStatus::Queued,
        }
    }

    /// Record a newly observed status.
    ///
    /// Returns `false` (and keeps the current status) once a terminal state
    /// has been observed.
    pub fn observe(&mut self, next: CrawlStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Submitted,
    Crawling,
    Chunking,
    Generating,
    Merging,
    Publishing,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Crawling => "crawling",
            Self::Chunking => "chunking",
            Self::Generating => "generating",
            Self::Merging => "merging",
            Self::Publishing => "publishing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "submitted" => Self::Submitted,
            "crawling" => Self::Crawling,
            "chunking" => Self::Chunking,
            "generating" => Self::Generating,
            "merging" => Self::Merging,
            "publishing" => Self::Publishing,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Stages only move forward one step at a time, except that `Merging`
    /// may finish the run directly when nothing is to be published, and any
    /// non-terminal state may fail.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Submitted, Crawling)
            | (Submitted, Chunking)
            | (Crawling, Chunking)
            | (Chunking, Generating)
            | (Generating, Merging)
            | (Merging, Publishing)
            | (Merging, Succeeded)
            | (Publishing, Succeeded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Trigger response
// ---------------------------------------------------------------------------

/// Structured `{message, data}` result returned by pipeline triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    /// `"successful"` or `"failed"`.
    pub message: String,
    /// Payload on success, failure reason otherwise.
    pub data: String,
}

impl TriggerResponse {
    pub fn successful(data: impl Into<String>) -> Self {
        Self {
            message: "successful".into(),
            data: data.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            message: "failed".into(),
            data: reason.into(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.message == "successful"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_ids_are_fresh() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn crawl_job_never_leaves_terminal_state() {
        let mut job = CrawlJob::queued("job-1");
        assert!(job.observe(CrawlStatus::Scraping));
        assert!(job.observe(CrawlStatus::Scraping));
        assert!(job.observe(CrawlStatus::Completed));
        assert!(!job.observe(CrawlStatus::Scraping));
        assert_eq!(job.status, CrawlStatus::Completed);
    }

    #[test]
    fn run_state_transitions() {
        use RunState::*;
        assert!(Submitted.can_transition_to(Crawling));
        assert!(Generating.can_transition_to(Merging));
        assert!(Merging.can_transition_to(Succeeded));
        assert!(Crawling.can_transition_to(Failed));
        assert!(!Crawling.can_transition_to(Merging));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Crawling));
    }

    #[test]
    fn run_state_storage_roundtrip() {
        for state in [
            RunState::Submitted,
            RunState::Crawling,
            RunState::Chunking,
            RunState::Generating,
            RunState::Merging,
            RunState::Publishing,
            RunState::Succeeded,
            RunState::Failed,
        ] {
            assert_eq!(RunState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RunState::parse("paused"), None);
    }

    #[test]
    fn trigger_response_serialization() {
        let json = serde_json::to_string(&TriggerResponse::failed("no pages")).expect("serialize");
        assert_eq!(json, r#"{"message":"failed","data":"no pages"}"#);
        assert!(TriggerResponse::successful("openapi: 3.0.0").is_successful());
    }
}

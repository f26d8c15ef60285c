//! libSQL record store for pipeline runs.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! run plus typed tables for that run's pages, chunks and fragments. Every
//! record is keyed by [`RunId`]; nothing is shared between runs, so two runs
//! for the same site never see each other's data.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use specpress_shared::{
    ChunkRecord, ChunkRef, FragmentRecord, PageRecord, PullRequestResult, Result, RunId, RunState,
    SpecPressError,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// Parameters for a new run row.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub run_id: RunId,
    pub site_url: &'a str,
    pub path_pattern: &'a str,
    pub page_limit: u32,
    pub integration_name: Option<&'a str>,
    /// Run whose stored pages this run reuses.
    pub parent_run_id: Option<RunId>,
}

/// A run row as stored.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub site_url: String,
    pub path_pattern: String,
    pub page_limit: u32,
    pub integration_name: Option<String>,
    pub parent_run_id: Option<String>,
    pub state: RunState,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub crawl_job_id: Option<String>,
    pub merged_spec: Option<String>,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk whose generation failed and was left out of the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFragment {
    pub order: usize,
    pub chunk_ref: ChunkRef,
    pub error: String,
}

fn db_err(e: libsql::Error) -> SpecPressError {
    SpecPressError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpecPressError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SpecPressError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Insert a new run in the `submitted` state.
    pub async fn insert_run(&self, run: &NewRun<'_>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let parent = run.parent_run_id.map(|id| id.to_string());
        self.conn
            .execute(
                "INSERT INTO runs (id, site_url, path_pattern, page_limit, integration_name,
                                   parent_run_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.run_id.to_string(),
                    run.site_url,
                    run.path_pattern,
                    i64::from(run.page_limit),
                    run.integration_name,
                    parent.as_deref(),
                    RunState::Submitted.as_str(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Record a state transition.
    pub async fn set_run_state(&self, run_id: RunId, state: RunState) -> Result<()> {
        self.update_run(
            "UPDATE runs SET state = ?1, updated_at = ?2 WHERE id = ?3",
            run_id,
            state.as_str(),
        )
        .await
    }

    /// Move a run to `failed`, keeping the originating error.
    pub async fn fail_run(&self, run_id: RunId, error_kind: &str, error_message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET state = ?1, error_kind = ?2, error_message = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    RunState::Failed.as_str(),
                    error_kind,
                    error_message,
                    now.as_str(),
                    run_id.to_string(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Remember the external crawl job backing a run.
    pub async fn set_crawl_job(&self, run_id: RunId, job_id: &str) -> Result<()> {
        self.update_run(
            "UPDATE runs SET crawl_job_id = ?1, updated_at = ?2 WHERE id = ?3",
            run_id,
            job_id,
        )
        .await
    }

    /// Store the merged specification text.
    pub async fn set_merged_spec(&self, run_id: RunId, text: &str) -> Result<()> {
        self.update_run(
            "UPDATE runs SET merged_spec = ?1, updated_at = ?2 WHERE id = ?3",
            run_id,
            text,
        )
        .await
    }

    /// Store the publication outcome.
    pub async fn set_pull_request(&self, run_id: RunId, pr: &PullRequestResult) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET branch_name = ?1, pr_url = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    pr.branch_name.as_str(),
                    pr.pr_url.as_str(),
                    now.as_str(),
                    run_id.to_string(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_run(&self, sql: &str, run_id: RunId, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(sql, params![value, now.as_str(), run_id.to_string()])
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, run_id: RunId) -> Result<Option<RunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, site_url, path_pattern, page_limit, integration_name, parent_run_id,
                        state, error_kind, error_message, crawl_job_id, merged_spec,
                        branch_name, pr_url, created_at, updated_at
                 FROM runs WHERE id = ?1",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List the most recent runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, site_url, path_pattern, page_limit, integration_name, parent_run_id,
                        state, error_kind, error_message, crawl_job_id, merged_spec,
                        branch_name, pr_url, created_at, updated_at
                 FROM runs ORDER BY id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Page operations
    // -----------------------------------------------------------------------

    /// Store the crawled pages of a run, in crawl order.
    pub async fn insert_pages(&self, run_id: RunId, pages: &[PageRecord]) -> Result<()> {
        let run = run_id.to_string();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for (position, page) in pages.iter().enumerate() {
            tx.execute(
                "INSERT INTO pages (run_id, position, source_url, markdown, crawled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.as_str(),
                    position as i64,
                    page.source_url.as_str(),
                    page.markdown.as_str(),
                    page.crawled_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// List the pages of a run, in crawl order.
    pub async fn list_pages(&self, run_id: RunId) -> Result<Vec<PageRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_url, markdown, crawled_at FROM pages
                 WHERE run_id = ?1 ORDER BY position",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(PageRecord {
                source_url: row.get::<String>(0).map_err(db_err)?,
                markdown: row.get::<String>(1).map_err(db_err)?,
                crawled_at: parse_timestamp(&row.get::<String>(2).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Store a run's chunks; slice position is the run-global chunk order.
    pub async fn insert_chunks(&self, run_id: RunId, chunks: &[ChunkRecord]) -> Result<()> {
        let run = run_id.to_string();
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for (position, chunk) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO chunks (run_id, position, parent_url, chunk_index, text)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.as_str(),
                    position as i64,
                    chunk.parent_url.as_str(),
                    chunk.index as i64,
                    chunk.text.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// List a run's chunks in run-global order.
    pub async fn list_chunks(&self, run_id: RunId) -> Result<Vec<ChunkRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT parent_url, chunk_index, text FROM chunks
                 WHERE run_id = ?1 ORDER BY position",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(ChunkRecord {
                parent_url: row.get::<String>(0).map_err(db_err)?,
                index: row.get::<i64>(1).map_err(db_err)? as usize,
                text: row.get::<String>(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Fragment operations
    // -----------------------------------------------------------------------

    /// Store a generated fragment.
    pub async fn insert_fragment(&self, run_id: RunId, fragment: &FragmentRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO fragments (run_id, position, parent_url, chunk_index, status,
                                        generated_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'generated', ?5, ?6)",
                params![
                    run_id.to_string(),
                    fragment.order as i64,
                    fragment.chunk_ref.parent_url.as_str(),
                    fragment.chunk_ref.index as i64,
                    fragment.generated_text.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Record that a chunk's fragment was skipped after a generation failure.
    pub async fn insert_skipped_fragment(&self, run_id: RunId, skipped: &SkippedFragment) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO fragments (run_id, position, parent_url, chunk_index, status,
                                        error, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'skipped', ?5, ?6)",
                params![
                    run_id.to_string(),
                    skipped.order as i64,
                    skipped.chunk_ref.parent_url.as_str(),
                    skipped.chunk_ref.index as i64,
                    skipped.error.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// List a run's generated fragments, ordered by chunk position.
    pub async fn list_fragments(&self, run_id: RunId) -> Result<Vec<FragmentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT position, parent_url, chunk_index, generated_text FROM fragments
                 WHERE run_id = ?1 AND status = 'generated' ORDER BY position",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(FragmentRecord {
                order: row.get::<i64>(0).map_err(db_err)? as usize,
                chunk_ref: ChunkRef {
                    parent_url: row.get::<String>(1).map_err(db_err)?,
                    index: row.get::<i64>(2).map_err(db_err)? as usize,
                },
                generated_text: row.get::<String>(3).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// List a run's skipped fragments, ordered by chunk position.
    pub async fn list_skipped_fragments(&self, run_id: RunId) -> Result<Vec<SkippedFragment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT position, parent_url, chunk_index, error FROM fragments
                 WHERE run_id = ?1 AND status = 'skipped' ORDER BY position",
                params![run_id.to_string()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SkippedFragment {
                order: row.get::<i64>(0).map_err(db_err)? as usize,
                chunk_ref: ChunkRef {
                    parent_url: row.get::<String>(1).map_err(db_err)?,
                    index: row.get::<i64>(2).map_err(db_err)? as usize,
                },
                error: row.get::<String>(3).unwrap_or_default(),
            });
        }
        Ok(results)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SpecPressError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`RunRow`].
fn row_to_run(row: &libsql::Row) -> Result<RunRow> {
    let state_str: String = row.get(6).map_err(db_err)?;
    let state = RunState::parse(&state_str)
        .ok_or_else(|| SpecPressError::Storage(format!("unknown run state '{state_str}'")))?;

    Ok(RunRow {
        id: row.get::<String>(0).map_err(db_err)?,
        site_url: row.get::<String>(1).map_err(db_err)?,
        path_pattern: row.get::<String>(2).map_err(db_err)?,
        page_limit: row.get::<i64>(3).map_err(db_err)? as u32,
        integration_name: row.get::<String>(4).ok(),
        parent_run_id: row.get::<String>(5).ok(),
        state,
        error_kind: row.get::<String>(7).ok(),
        error_message: row.get::<String>(8).ok(),
        crawl_job_id: row.get::<String>(9).ok(),
        merged_spec: row.get::<String>(10).ok(),
        branch_name: row.get::<String>(11).ok(),
        pr_url: row.get::<String>(12).ok(),
        created_at: parse_timestamp(&row.get::<String>(13).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(14).map_err(db_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sp_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn new_run(run_id: RunId, site_url: &str) -> NewRun<'_> {
        NewRun {
            run_id,
            site_url,
            path_pattern: ".*",
            page_limit: 3,
            integration_name: Some("acme"),
            parent_run_id: None,
        }
    }

    fn page(url: &str, markdown: &str) -> PageRecord {
        PageRecord {
            source_url: url.into(),
            markdown: markdown.into(),
            crawled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sp_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage
            .insert_run(&new_run(run_id, "https://docs.example.com/api"))
            .await
            .expect("insert run");

        let run = storage.get_run(run_id).await.expect("get").expect("exists");
        assert_eq!(run.state, RunState::Submitted);
        assert_eq!(run.integration_name.as_deref(), Some("acme"));
        assert!(run.parent_run_id.is_none());

        storage.set_run_state(run_id, RunState::Crawling).await.unwrap();
        storage.set_crawl_job(run_id, "job-42").await.unwrap();
        storage.set_merged_spec(run_id, "openapi: 3.0.0").await.unwrap();
        storage
            .set_pull_request(
                run_id,
                &PullRequestResult {
                    branch_name: "open-api-spec-writer/acme-1".into(),
                    files_written: vec![],
                    pr_url: "https://github.com/acme/repo/pull/1".into(),
                },
            )
            .await
            .unwrap();

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Crawling);
        assert_eq!(run.crawl_job_id.as_deref(), Some("job-42"));
        assert_eq!(run.merged_spec.as_deref(), Some("openapi: 3.0.0"));
        assert_eq!(run.pr_url.as_deref(), Some("https://github.com/acme/repo/pull/1"));
    }

    #[tokio::test]
    async fn failed_run_keeps_error() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&new_run(run_id, "https://a.example")).await.unwrap();
        storage
            .fail_run(run_id, "merge", "merge error: no fragments")
            .await
            .unwrap();

        let run = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("merge"));
        assert!(run.error_message.unwrap().contains("no fragments"));
    }

    #[tokio::test]
    async fn records_are_scoped_by_run() {
        let storage = test_storage().await;
        let site = "https://docs.example.com/api";
        let first = RunId::new();
        let second = RunId::new();
        storage.insert_run(&new_run(first, site)).await.unwrap();
        storage.insert_run(&new_run(second, site)).await.unwrap();

        storage
            .insert_pages(first, &[page("https://docs.example.com/api/a", "old")])
            .await
            .unwrap();
        storage
            .insert_pages(
                second,
                &[
                    page("https://docs.example.com/api/a", "new"),
                    page("https://docs.example.com/api/b", "more"),
                ],
            )
            .await
            .unwrap();

        let first_pages = storage.list_pages(first).await.unwrap();
        let second_pages = storage.list_pages(second).await.unwrap();
        assert_eq!(first_pages.len(), 1);
        assert_eq!(first_pages[0].markdown, "old");
        assert_eq!(second_pages.len(), 2);
        assert_eq!(second_pages[1].source_url, "https://docs.example.com/api/b");
    }

    #[tokio::test]
    async fn chunks_keep_order() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&new_run(run_id, "https://a.example")).await.unwrap();

        let chunks: Vec<ChunkRecord> = (0..3)
            .map(|i| ChunkRecord {
                parent_url: "https://a.example/p".into(),
                index: i,
                text: format!("chunk {i}"),
            })
            .collect();
        storage.insert_chunks(run_id, &chunks).await.unwrap();

        assert_eq!(storage.list_chunks(run_id).await.unwrap(), chunks);
    }

    #[tokio::test]
    async fn fragments_and_skips() {
        let storage = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&new_run(run_id, "https://a.example")).await.unwrap();

        let chunk_ref = |index| ChunkRef {
            parent_url: "https://a.example/p".into(),
            index,
        };
        storage
            .insert_fragment(
                run_id,
                &FragmentRecord {
                    chunk_ref: chunk_ref(2),
                    generated_text: "paths: {}".into(),
                    order: 2,
                },
            )
            .await
            .unwrap();
        storage
            .insert_fragment(
                run_id,
                &FragmentRecord {
                    chunk_ref: chunk_ref(0),
                    generated_text: "openapi: 3.0.0".into(),
                    order: 0,
                },
            )
            .await
            .unwrap();
        storage
            .insert_skipped_fragment(
                run_id,
                &SkippedFragment {
                    order: 1,
                    chunk_ref: chunk_ref(1),
                    error: "generation error: HTTP 500".into(),
                },
            )
            .await
            .unwrap();

        let fragments = storage.list_fragments(run_id).await.unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].order, 0);
        assert_eq!(fragments[1].order, 2);

        let skipped = storage.list_skipped_fragments(run_id).await.unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].chunk_ref.index, 1);
    }

    #[tokio::test]
    async fn list_runs_newest_first() {
        let storage = test_storage().await;
        let older = RunId::new();
        let newer = RunId::new();
        storage.insert_run(&new_run(newer, "https://a.example")).await.unwrap();
        storage.insert_run(&new_run(older, "https://a.example")).await.unwrap();

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.to_string());
    }
}

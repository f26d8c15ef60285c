//! SQL migration definitions for the SpecPress record store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, pages, chunks, fragments",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per pipeline invocation
CREATE TABLE IF NOT EXISTS runs (
    id               TEXT PRIMARY KEY,
    site_url         TEXT NOT NULL,
    path_pattern     TEXT NOT NULL,
    page_limit       INTEGER NOT NULL,
    integration_name TEXT,
    parent_run_id    TEXT,
    state            TEXT NOT NULL,
    error_kind       TEXT,
    error_message    TEXT,
    crawl_job_id     TEXT,
    merged_spec      TEXT,
    branch_name      TEXT,
    pr_url           TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_site_url ON runs(site_url);

-- Crawled pages, in crawl order
CREATE TABLE IF NOT EXISTS pages (
    run_id     TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    source_url TEXT NOT NULL,
    markdown   TEXT NOT NULL,
    crawled_at TEXT NOT NULL,
    PRIMARY KEY (run_id, position)
);

-- Chunks, keyed by their run-global position
CREATE TABLE IF NOT EXISTS chunks (
    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    parent_url  TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text        TEXT NOT NULL,
    PRIMARY KEY (run_id, position)
);

-- Generated or skipped fragments, one per chunk position
CREATE TABLE IF NOT EXISTS fragments (
    run_id         TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    parent_url     TEXT NOT NULL,
    chunk_index    INTEGER NOT NULL,
    status         TEXT NOT NULL CHECK (status IN ('generated', 'skipped')),
    generated_text TEXT,
    error          TEXT,
    created_at     TEXT NOT NULL,
    PRIMARY KEY (run_id, position)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

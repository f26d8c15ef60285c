//! Shared types, error model, and configuration for SpecPress.
//!
//! This crate is the foundation depended on by all other SpecPress crates.
//! It provides:
//! - [`SpecPressError`]: the unified error type
//! - Domain types ([`PageRecord`], [`ChunkRecord`], [`FragmentRecord`], [`RunId`], ...)
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlServiceConfig, DefaultsConfig, FailurePolicy, GitHubConfig, OpenRouterConfig,
    PipelineConfig, config_dir, config_file_path, database_path, init_config, load_config,
    load_config_from, read_secret,
};
pub use error::{Result, SpecPressError};
pub use types::{
    ChunkRecord, ChunkRef, CrawlJob, CrawlStatus, FragmentRecord, MergedSpec, PageRecord,
    PullRequestResult, RepoCoords, RunId, RunState, TriggerResponse,
};

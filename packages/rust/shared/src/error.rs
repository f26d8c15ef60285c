//! Error types for SpecPress.
//!
//! Library crates use [`SpecPressError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all SpecPress operations.
#[derive(Debug, thiserror::Error)]
pub enum SpecPressError {
    /// The crawl service rejected the request, or the request was malformed.
    #[error("crawl submission rejected: {message}")]
    Submission { message: String },

    /// The crawl job did not reach a terminal state before the deadline.
    #[error("crawl job {job_id} timed out after {elapsed:?}")]
    CrawlTimeout { job_id: String, elapsed: Duration },

    /// The crawl job reached the `failed` terminal state.
    #[error("crawl job {job_id} failed: {reason}")]
    CrawlFailed { job_id: String, reason: String },

    /// A text-generation call failed (per chunk or during formatting).
    #[error("generation error: {message}")]
    Generation { message: String },

    /// The merge step could not produce a document.
    #[error("merge error: {message}")]
    Merge { message: String },

    /// A step of the pull-request publication failed.
    #[error("publish error during {step}: {message}")]
    Publish { step: &'static str, message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpecPressError>;

impl SpecPressError {
    /// Create a submission error.
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission {
            message: msg.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation {
            message: msg.into(),
        }
    }

    /// Create a merge error.
    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge {
            message: msg.into(),
        }
    }

    /// Create a publish error for the named step.
    pub fn publish(step: &'static str, msg: impl Into<String>) -> Self {
        Self::Publish {
            step,
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name of the error kind, stored alongside failed runs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submission { .. } => "submission",
            Self::CrawlTimeout { .. } => "crawl_timeout",
            Self::CrawlFailed { .. } => "crawl_failed",
            Self::Generation { .. } => "generation",
            Self::Merge { .. } => "merge",
            Self::Publish { .. } => "publish",
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::Storage(_) => "storage",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
        }
    }
}

//! Pull-request publication on GitHub.
//!
//! This crate provides:
//! - [`GitHost`]: the repository operations publication needs
//! - [`GitHubClient`]: the GitHub REST adapter
//! - [`PullRequestPublisher`]: branch, files and pull request for one spec

pub mod host;
pub mod publisher;

pub use host::{GitHost, GitHubClient};
pub use publisher::{PublishRequest, PublishSettings, PullRequestPublisher, RepoPublisher, slugify};

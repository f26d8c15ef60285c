//! Crawl job submission and polling.
//!
//! This crate provides:
//! - [`CrawlService`]: the port to an external page-collection service
//! - [`FirecrawlService`]: the Firecrawl v1 HTTP adapter
//! - [`CrawlJobClient`]: request validation and the deadline-bounded poll loop

pub mod client;
pub mod firecrawl;
pub mod service;

pub use client::{CrawlJobClient, validate_request};
pub use firecrawl::{CrawlSettings, FirecrawlService};
pub use service::{CrawlRequest, CrawlService, CrawlStatusReport, CrawledPage};

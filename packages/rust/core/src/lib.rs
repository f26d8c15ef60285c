//! Core pipeline orchestration and domain logic for SpecPress.
//!
//! This crate ties together crawling, chunking, fragment generation, merging
//! and publication into end-to-end runs (see [`pipeline`]), and exposes the
//! `{message, data}` job entry points in [`trigger`].

pub mod chunker;
pub mod fragments;
pub mod merger;
pub mod pipeline;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use fragments::{GenerationOutcome, SpecFragmentGenerator};
pub use merger::SpecMerger;
pub use pipeline::{
    PipelineOrchestrator, ProgressReporter, RetryPlan, RunReport, RunRequest, SilentProgress,
};
pub use trigger::{PublishTrigger, SpecTrigger, execute_generation, generate_spec, publish_spec};

//! Per-chunk specification fragment generation.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use specpress_llm::TextGenerator;
use specpress_shared::{ChunkRecord, FailurePolicy, FragmentRecord, Result, SpecPressError};
use specpress_storage::SkippedFragment;

use crate::pipeline::ProgressReporter;

/// Build the generation prompt for one chunk of documentation.
pub fn fragment_prompt(chunk_text: &str) -> String {
    format!(
        "I wrote another page of docs, turn this into an Open API spec. \
Return only the YAML document.\n\n{chunk_text}"
    )
}

/// Fragments produced for a run, plus the chunks that were skipped.
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    /// Generated fragments, sorted by `order`.
    pub fragments: Vec<FragmentRecord>,
    /// Chunks whose generation failed under [`FailurePolicy::Skip`].
    pub skipped: Vec<SkippedFragment>,
}

/// Turns chunks into fragments through a [`TextGenerator`].
pub struct SpecFragmentGenerator {
    generator: Arc<dyn TextGenerator>,
    concurrency: usize,
    policy: FailurePolicy,
}

impl SpecFragmentGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, concurrency: usize, policy: FailurePolicy) -> Self {
        Self {
            generator,
            concurrency: concurrency.max(1),
            policy,
        }
    }

    /// Generate the fragment for a single chunk at run-global position `order`.
    pub async fn generate(&self, order: usize, chunk: &ChunkRecord) -> Result<FragmentRecord> {
        let text = self
            .generator
            .generate_text(&fragment_prompt(&chunk.text))
            .await
            .map_err(|e| match e {
                SpecPressError::Generation { .. } => e,
                other => SpecPressError::generation(other.to_string()),
            })?;

        Ok(FragmentRecord {
            chunk_ref: chunk.chunk_ref(),
            generated_text: text,
            order,
        })
    }

    /// Generate fragments for every chunk with bounded concurrency.
    ///
    /// Under [`FailurePolicy::Abort`] the first failure is returned and the
    /// remaining in-flight calls are dropped. Under [`FailurePolicy::Skip`]
    /// failures are collected, and the call only fails if no chunk succeeded.
    pub async fn generate_all(
        &self,
        chunks: &[ChunkRecord],
        progress: &dyn ProgressReporter,
    ) -> Result<GenerationOutcome> {
        let (outcome, result) = self.generate_collecting(chunks, progress).await;
        result.map(|()| outcome)
    }

    /// Like [`generate_all`](Self::generate_all), but the fragments and
    /// skips gathered before a failure are handed back alongside it.
    #[instrument(skip_all, fields(chunks = chunks.len(), concurrency = self.concurrency))]
    pub async fn generate_collecting(
        &self,
        chunks: &[ChunkRecord],
        progress: &dyn ProgressReporter,
    ) -> (GenerationOutcome, Result<()>) {
        let total = chunks.len();
        let mut outcome = GenerationOutcome::default();
        let mut done = 0;
        let mut failure = None;

        let mut results = futures::stream::iter(chunks.iter().enumerate())
            .map(|(order, chunk)| async move { (order, chunk, self.generate(order, chunk).await) })
            .buffer_unordered(self.concurrency);

        while let Some((order, chunk, result)) = results.next().await {
            done += 1;
            progress.fragment_generated(done, total);
            match result {
                Ok(fragment) => {
                    debug!(order, url = %chunk.parent_url, "fragment generated");
                    outcome.fragments.push(fragment);
                }
                Err(e) => match self.policy {
                    FailurePolicy::Abort => {
                        warn!(order, url = %chunk.parent_url, error = %e, "fragment generation failed, aborting");
                        failure = Some(e);
                        break;
                    }
                    FailurePolicy::Skip => {
                        warn!(order, url = %chunk.parent_url, error = %e, "fragment generation failed, skipping chunk");
                        outcome.skipped.push(SkippedFragment {
                            order,
                            chunk_ref: chunk.chunk_ref(),
                            error: e.to_string(),
                        });
                    }
                },
            }
        }

        outcome.fragments.sort_by_key(|f| f.order);
        outcome.skipped.sort_by_key(|s| s.order);

        if let Some(e) = failure {
            return (outcome, Err(e));
        }
        if total > 0 && outcome.fragments.is_empty() {
            let err = SpecPressError::generation(format!("all {total} chunks failed to generate"));
            return (outcome, Err(err));
        }

        info!(
            generated = outcome.fragments.len(),
            skipped = outcome.skipped.len(),
            "fragment generation finished"
        );
        (outcome, Ok(()))
    }
}

//! Single-call merge of all fragments into one specification.

use std::sync::Arc;

use tracing::{info, instrument};

use specpress_llm::TextGenerator;
use specpress_shared::{FragmentRecord, MergedSpec, Result, SpecPressError};

/// Build the merge prompt: fragments in `order`, each between numbered markers.
pub fn merge_prompt(fragments: &[FragmentRecord]) -> String {
    let mut sorted: Vec<&FragmentRecord> = fragments.iter().collect();
    sorted.sort_by_key(|f| f.order);

    let total = sorted.len();
    let mut prompt = format!(
        "I have generated the following {total} Open API spec fragments. \
Merge them into a single, coherent Open API spec and return only the YAML document.\n"
    );
    for (i, fragment) in sorted.iter().enumerate() {
        let n = i + 1;
        prompt.push_str(&format!(
            "\n===== FRAGMENT {n} OF {total} =====\n{}\n===== END FRAGMENT {n} =====\n",
            fragment.generated_text.trim()
        ));
    }
    prompt
}

/// Remove one Markdown code fence wrapping the whole document, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `yaml`) on the opening line.
    match body.split_once('\n') {
        Some((_info, inner)) => inner.trim(),
        None => trimmed,
    }
}

/// Merges fragments through a [`TextGenerator`].
pub struct SpecMerger {
    generator: Arc<dyn TextGenerator>,
    input_limit: usize,
}

impl SpecMerger {
    /// `input_limit` caps the merge prompt, in characters.
    pub fn new(generator: Arc<dyn TextGenerator>, input_limit: usize) -> Self {
        Self {
            generator,
            input_limit,
        }
    }

    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub async fn merge(&self, fragments: &[FragmentRecord]) -> Result<MergedSpec> {
        if fragments.is_empty() {
            return Err(SpecPressError::merge("no fragments to merge"));
        }

        let prompt = merge_prompt(fragments);
        let prompt_chars = prompt.chars().count();
        if prompt_chars > self.input_limit {
            return Err(SpecPressError::merge(format!(
                "merge input of {prompt_chars} characters exceeds the limit of {}",
                self.input_limit
            )));
        }

        let text = self
            .generator
            .generate_text(&prompt)
            .await
            .map_err(|e| SpecPressError::merge(format!("generation failed: {e}")))?;

        let text = strip_code_fence(&text);
        if text.is_empty() {
            return Err(SpecPressError::merge("generator returned an empty document"));
        }

        info!(prompt_chars, merged_chars = text.len(), "fragments merged");
        Ok(MergedSpec {
            text: text.to_string(),
        })
    }
}

/// Normalize a document as YAML with one more generation pass.
#[instrument(skip_all, fields(chars = text.len()))]
pub async fn format_as_yaml(generator: &dyn TextGenerator, text: &str) -> Result<String> {
    let prompt = format!(
        "Format the following text blob into proper YAML. \
Return only the YAML document.\n\n{text}"
    );
    let formatted = generator.generate_text(&prompt).await.map_err(|e| match e {
        SpecPressError::Generation { .. } => e,
        other => SpecPressError::generation(other.to_string()),
    })?;

    let formatted = strip_code_fence(&formatted);
    if formatted.is_empty() {
        return Err(SpecPressError::generation("formatting returned an empty document"));
    }
    Ok(formatted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FnGenerator;
    use specpress_shared::ChunkRef;

    fn fragment(order: usize, text: &str) -> FragmentRecord {
        FragmentRecord {
            chunk_ref: ChunkRef {
                parent_url: "https://docs.example.com/api".into(),
                index: order,
            },
            generated_text: text.into(),
            order,
        }
    }

    #[test]
    fn prompt_orders_and_delimits_fragments() {
        let prompt = merge_prompt(&[fragment(2, "third"), fragment(0, "first"), fragment(1, "second")]);

        let first = prompt.find("first").unwrap();
        let second = prompt.find("second").unwrap();
        let third = prompt.find("third").unwrap();
        assert!(first < second && second < third);
        assert!(prompt.contains("===== FRAGMENT 1 OF 3 ====="));
        assert!(prompt.contains("===== END FRAGMENT 3 ====="));
    }

    #[test]
    fn strips_enclosing_fence_only() {
        assert_eq!(strip_code_fence("```yaml\nopenapi: 3.0.0\n```"), "openapi: 3.0.0");
        assert_eq!(strip_code_fence("```\na: 1\n```\n"), "a: 1");
        assert_eq!(strip_code_fence("openapi: 3.0.0"), "openapi: 3.0.0");
        // An inner fence is content, not a wrapper.
        let inner = "description: |\n  ```\n  curl\n  ```";
        assert_eq!(strip_code_fence(inner), inner);
    }

    #[tokio::test]
    async fn merges_in_one_call() {
        let generator = FnGenerator::new(|_| Ok("```yaml\nopenapi: 3.0.0\npaths: {}\n```".into()));
        let merger = SpecMerger::new(generator.clone(), 10_000);

        let merged = merger
            .merge(&[fragment(0, "paths: {/a: {}}"), fragment(1, "paths: {/b: {}}")])
            .await
            .unwrap();

        assert_eq!(merged.text, "openapi: 3.0.0\npaths: {}");
        assert_eq!(generator.calls(), 1);
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("/a") && prompt.contains("/b"));
    }

    #[tokio::test]
    async fn empty_input_is_a_merge_error() {
        let generator = FnGenerator::new(|_| Ok("unused".into()));
        let merger = SpecMerger::new(generator.clone(), 10_000);

        let err = merger.merge(&[]).await.unwrap_err();
        assert_eq!(err.kind(), "merge");
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_input_fails_before_calling() {
        let generator = FnGenerator::new(|_| Ok("unused".into()));
        let merger = SpecMerger::new(generator.clone(), 100);

        let big = "x".repeat(200);
        let err = merger.merge(&[fragment(0, &big)]).await.unwrap_err();
        assert_eq!(err.kind(), "merge");
        assert!(err.to_string().contains("exceeds"));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn generation_failure_is_a_merge_error() {
        let generator = FnGenerator::new(|_| Err(SpecPressError::generation("HTTP 502")));
        let merger = SpecMerger::new(generator, 10_000);

        let err = merger.merge(&[fragment(0, "a: 1")]).await.unwrap_err();
        assert_eq!(err.kind(), "merge");
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn format_strips_fence() {
        let generator = FnGenerator::new(|_| Ok("```yaml\nopenapi: 3.0.0\n```".into()));
        let formatted = format_as_yaml(generator.as_ref(), "openapi:3.0.0").await.unwrap();
        assert_eq!(formatted, "openapi: 3.0.0");
    }
}

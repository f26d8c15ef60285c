//! Background-job entry points returning `{message, data}`.
//!
//! Triggers never propagate errors: every failure becomes a
//! [`TriggerResponse::failed`] carrying the reason.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use specpress_shared::{DefaultsConfig, Result, RunId, TriggerResponse};

use crate::pipeline::{PipelineOrchestrator, ProgressReporter, RunReport, RunRequest};

/// Input of the spec-generation trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecTrigger {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,
}

/// Input of the publish trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTrigger {
    pub yaml: String,
    pub integration_name: String,
    pub crawled_url: String,
}

impl SpecTrigger {
    /// The run this trigger asks for, with unset fields taken from `defaults`.
    pub fn to_request(&self, defaults: &DefaultsConfig) -> RunRequest {
        RunRequest {
            site_url: self.url.clone(),
            path_pattern: self
                .path_regex
                .clone()
                .unwrap_or_else(|| defaults.path_pattern.clone()),
            page_limit: defaults.page_limit,
            integration_name: None,
        }
    }
}

/// Crawl, chunk, generate and merge; `data` is the merged document.
pub async fn generate_spec(
    orchestrator: &PipelineOrchestrator,
    defaults: &DefaultsConfig,
    trigger: &SpecTrigger,
    progress: &dyn ProgressReporter,
) -> TriggerResponse {
    let request = trigger.to_request(defaults);
    match orchestrator.begin(&request).await {
        Ok(run_id) => execute_generation(orchestrator, run_id, &request, progress).await,
        Err(e) => spec_response(&request.site_url, Err(e)),
    }
}

/// Drive a generation run registered with
/// [`PipelineOrchestrator::begin`] and fold the outcome into a response.
pub async fn execute_generation(
    orchestrator: &PipelineOrchestrator,
    run_id: RunId,
    request: &RunRequest,
    progress: &dyn ProgressReporter,
) -> TriggerResponse {
    let result = orchestrator.execute(run_id, request, progress).await;
    spec_response(&request.site_url, result)
}

fn spec_response(url: &str, result: Result<RunReport>) -> TriggerResponse {
    match result {
        Ok(report) => {
            info!(run_id = %report.run_id, "spec generation trigger succeeded");
            TriggerResponse::successful(report.merged.text)
        }
        Err(e) => {
            warn!(url = %url, error = %e, "spec generation trigger failed");
            TriggerResponse::failed(e.to_string())
        }
    }
}

/// Publish an existing document; `data` is the pull-request URL.
pub async fn publish_spec(
    orchestrator: &PipelineOrchestrator,
    trigger: &PublishTrigger,
) -> TriggerResponse {
    if trigger.yaml.trim().is_empty() {
        return TriggerResponse::failed("no document to publish");
    }

    match orchestrator
        .publish_document(&trigger.yaml, &trigger.integration_name, &trigger.crawled_url)
        .await
    {
        Ok(pr) => {
            info!(pr_url = %pr.pr_url, "publish trigger succeeded");
            TriggerResponse::successful(pr.pr_url)
        }
        Err(e) => {
            warn!(integration = %trigger.integration_name, error = %e, "publish trigger failed");
            TriggerResponse::failed(e.to_string())
        }
    }
}

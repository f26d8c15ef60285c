//! OpenRouter chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use specpress_shared::{AppConfig, Result, SpecPressError, read_secret};

use crate::TextGenerator;

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("SpecPress/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "You write OpenAPI 3 specifications from API documentation. \
Respond with the requested document text only: no commentary, no explanations, \
no surrounding prose.";

/// [`TextGenerator`] backed by the OpenRouter API.
pub struct OpenRouterGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
    retry_base: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterGenerator {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SpecPressError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            max_retries: 2,
            retry_base: Duration::from_millis(500),
        })
    }

    /// Build from application config, reading the API key from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = read_secret(&config.openrouter.api_key_env, "OpenRouter API key")?;
        Ok(Self::new(
            &config.openrouter.base_url,
            api_key,
            &config.openrouter.default_model,
            Duration::from_secs(config.openrouter.request_timeout_secs),
        )?
        .with_retries(config.openrouter.max_retries))
    }

    /// Retries for 429, 5xx and transport timeouts.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// First back-off delay; doubles on each retry.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        self.retry_base * (1 << attempt.min(5))
    }

    async fn send_once(&self, prompt: &str) -> std::result::Result<String, Attempt> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let retry = e.is_timeout() || e.is_connect();
                Attempt::new(format!("request failed: {e}"), retry)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Attempt::new(
                format!("OpenRouter returned {status}: {text}"),
                should_retry(status),
            ));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Attempt::new(format!("failed to parse response: {e}"), false))?;

        let text = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(Attempt::new("model returned empty text", false));
        }
        Ok(text)
    }
}

/// A failed attempt and whether it is worth repeating.
struct Attempt {
    message: String,
    retry: bool,
}

impl Attempt {
    fn new(message: impl Into<String>, retry: bool) -> Self {
        Self {
            message: message.into(),
            retry,
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(prompt).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "generation succeeded");
                    return Ok(text);
                }
                Err(failure) if failure.retry && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff(attempt);
                    warn!(attempt, ?delay, error = %failure.message, "retrying generation");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(SpecPressError::generation(failure.message)),
            }
        }
    }
}

//! Text generation port and its OpenRouter adapter.
//!
//! This crate provides:
//! - [`TextGenerator`]: prompt in, document text out
//! - [`OpenRouterGenerator`]: chat-completions client with bounded retry

pub mod openrouter;

use async_trait::async_trait;

use specpress_shared::Result;

pub use openrouter::OpenRouterGenerator;

/// Turns a prompt into generated text.
///
/// Implementations return the document text only. An empty answer is an
/// error, never `Ok("")`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

//! Pure OpenRouter REST API client
//!
//! A clean, minimal client for the OpenRouter API with no domain-specific
//! logic. Supports chat completions and embeddings, and keeps a running
//! tally of token usage across calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use openrouter_client::{OpenRouterClient, ChatRequest, Message};
//!
//! let client = OpenRouterClient::new(api_key);
//!
//! let response = client.chat_completion(
//!     ChatRequest::new("openai/gpt-4o")
//!         .message(Message::system("You are an SEO copywriter."))
//!         .message(Message::user("Write a heading about coffee makers."))
//!         .temperature(0.7),
//! ).await?;
//!
//! let usage = client.token_usage(false);
//! ```

pub mod error;
pub mod types;

pub use error::{OpenRouterError, Result};
pub use types::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::types::{ChatResponseRaw, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Accumulated token counters shared across clones of a client.
#[derive(Default)]
struct TokenCounters {
    prompt: AtomicU64,
    completion: AtomicU64,
    total: AtomicU64,
}

/// Pure OpenRouter API client.
#[derive(Clone)]
pub struct OpenRouterClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    counters: Arc<TokenCounters>,
}

impl OpenRouterClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            counters: Arc::new(TokenCounters::default()),
        }
    }

    /// Set a custom base URL (for proxies or OpenAI-compatible backends).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion request.
    ///
    /// Token usage from the response is added to the running counters.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenRouterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: ChatResponseRaw = response.json().await?;
        let usage = raw.usage;

        if let Some(usage) = usage {
            self.counters
                .prompt
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.counters
                .completion
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
            self.counters
                .total
                .fetch_add(usage.total_tokens, Ordering::Relaxed);
        }

        let content = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OpenRouterError::UnexpectedResponse("no choices returned".into()))?;

        Ok(ChatResponse { content, usage })
    }

    /// Create an embedding for a single text.
    pub async fn create_embedding(&self, input: &str, model: &str) -> Result<Vec<f32>> {
        self.create_embedding_at(&format!("{}/embeddings", self.base_url), input, model)
            .await
    }

    /// Create an embedding against an explicit endpoint URL.
    ///
    /// Some deployments route embeddings through a different OpenAI-compatible
    /// host than chat completions.
    pub async fn create_embedding_at(
        &self,
        endpoint: &str,
        input: &str,
        model: &str,
    ) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: input.to_string(),
            model: model.to_string(),
        };

        let response = self
            .http_client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenRouterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OpenRouterError::UnexpectedResponse("no embedding returned".into()))
    }

    /// Read the accumulated token usage, optionally resetting the counters.
    pub fn token_usage(&self, reset: bool) -> Usage {
        if reset {
            Usage {
                prompt_tokens: self.counters.prompt.swap(0, Ordering::Relaxed),
                completion_tokens: self.counters.completion.swap(0, Ordering::Relaxed),
                total_tokens: self.counters.total.swap(0, Ordering::Relaxed),
            }
        } else {
            Usage {
                prompt_tokens: self.counters.prompt.load(Ordering::Relaxed),
                completion_tokens: self.counters.completion.load(Ordering::Relaxed),
                total_tokens: self.counters.total.load(Ordering::Relaxed),
            }
        }
    }

    /// Record usage reported by an out-of-band call (e.g., a mocked backend).
    pub fn record_usage(&self, usage: Usage) {
        self.counters
            .prompt
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.counters
            .completion
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.counters
            .total
            .fetch_add(usage.total_tokens, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_accumulates_and_resets() {
        let client = OpenRouterClient::new("test-key");
        client.record_usage(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        client.record_usage(Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });

        let usage = client.token_usage(false);
        assert_eq!(usage.prompt_tokens, 11);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 18);

        let drained = client.token_usage(true);
        assert_eq!(drained.total_tokens, 18);
        assert_eq!(client.token_usage(false).total_tokens, 0);
    }

    #[test]
    fn clones_share_counters() {
        let client = OpenRouterClient::new("test-key");
        let clone = client.clone();
        clone.record_usage(Usage {
            prompt_tokens: 4,
            completion_tokens: 4,
            total_tokens: 8,
        });
        assert_eq!(client.token_usage(false).total_tokens, 8);
    }

    #[test]
    fn base_url_override() {
        let client = OpenRouterClient::new("k").with_base_url("http://localhost:9999/v1");
        assert_eq!(client.base_url(), "http://localhost:9999/v1");
    }
}

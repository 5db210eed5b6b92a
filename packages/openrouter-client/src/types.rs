//! OpenRouter API request and response types.
//!
//! OpenRouter speaks the OpenAI chat-completions wire format, so these
//! types mirror that shape.

use serde::{Deserialize, Serialize};

// =============================================================================
// Chat Completion
// =============================================================================

/// Chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model to use (e.g., "openai/gpt-4o")
    pub model: String,

    /// Conversation messages
    pub messages: Vec<Message>,

    /// Sampling temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens in the completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Create a new chat request with the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Add a message to the conversation.
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the completion token cap.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion response content plus usage.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant message content
    pub content: String,

    /// Token usage statistics for this call
    pub usage: Option<Usage>,
}

/// Raw chat response from the API (for internal parsing).
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseRaw {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessageResponse {
    pub content: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

// =============================================================================
// Embeddings
// =============================================================================

/// Embedding request.
#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest {
    pub input: String,
    pub model: String,
}

/// Embedding response.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_without_empty_options() {
        let request = ChatRequest::new("openai/gpt-4o").message(Message::user("hi"));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"openai/gpt-4o\""));
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn chat_response_raw_parses() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let raw: ChatResponseRaw = serde_json::from_str(body).unwrap();
        assert_eq!(raw.choices[0].message.content, "hello");
        assert_eq!(raw.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn usage_defaults_missing_fields() {
        let usage: Usage = serde_json::from_str(r#"{"total_tokens": 7}"#).unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, 7);
    }
}

//! Vector-similarity provider: Supabase RPC matching plus embedding-backed
//! question answering.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::traits::{BaseAnswerFinder, BaseEmbedding, BaseVectorSearch, DocumentMatch};
use crate::domains::generations::models::AnsweredQuestion;
use openrouter_client::OpenRouterClient;

/// Nearest-neighbour count for question answering.
const ANSWER_MATCH_COUNT: usize = 5;

/// Similarity floor for a usable answer.
const ANSWER_SIMILARITY_FLOOR: f32 = 0.55;

/// Maximum stored answer length.
const ANSWER_MAX_CHARS: usize = 1_000;

/// Residual queries shorter than this fall back to the raw question.
const MIN_QUERY_CHARS: usize = 6;

// =============================================================================
// Embeddings via the chat provider
// =============================================================================

/// Embedding client backed by the chat provider's embeddings endpoint.
pub struct OpenRouterEmbedding {
    client: OpenRouterClient,
    endpoint: String,
    model: String,
}

impl OpenRouterEmbedding {
    pub fn new(api_key: String, endpoint: String, model: String) -> Self {
        Self {
            client: OpenRouterClient::new(api_key),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl BaseEmbedding for OpenRouterEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client
            .create_embedding_at(&self.endpoint, text, &self.model)
            .await
            .context("embedding request failed")
    }
}

// =============================================================================
// Supabase vector store
// =============================================================================

/// Supabase client calling the `match_documents` RPC.
pub struct SupabaseVectorClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    match_threshold: f32,
}

impl SupabaseVectorClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl BaseVectorSearch for SupabaseVectorClient {
    async fn match_documents(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<DocumentMatch>> {
        let request = MatchRequest {
            query_embedding: vector,
            match_count: k,
            match_threshold: min_similarity,
        };

        let response = self
            .client
            .post(format!("{}/rest/v1/rpc/match_documents", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Supabase match request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Supabase match error {}: {}", status, body);
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse Supabase match response")?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let similarity = row.get("similarity")?.as_f64()? as f32;
                if similarity < min_similarity {
                    return None;
                }
                Some(DocumentMatch {
                    content: row
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    metadata: row.get("metadata").cloned().unwrap_or(Value::Null),
                    similarity,
                })
            })
            .collect())
    }
}

// =============================================================================
// Question answering
// =============================================================================

/// Answers research questions by embedding a distilled query and matching
/// against the vector store.
pub struct AnswerFinder {
    embedding: Arc<dyn BaseEmbedding>,
    vectors: Arc<dyn BaseVectorSearch>,
}

impl AnswerFinder {
    pub fn new(embedding: Arc<dyn BaseEmbedding>, vectors: Arc<dyn BaseVectorSearch>) -> Self {
        Self { embedding, vectors }
    }
}

#[async_trait]
impl BaseAnswerFinder for AnswerFinder {
    async fn find_answer(&self, question: &str) -> Result<Option<AnsweredQuestion>> {
        let query = prepare_query(question);
        debug!(question = %question, query = %query, "searching for answer");

        let vector = self.embedding.embed(&query).await?;
        let matches = self
            .vectors
            .match_documents(&vector, ANSWER_MATCH_COUNT, ANSWER_SIMILARITY_FLOOR)
            .await?;

        let Some(top) = matches.into_iter().max_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return Ok(None);
        };

        let source = top
            .metadata
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Some(AnsweredQuestion {
            question: question.to_string(),
            answer: truncate_answer(&top.content),
            source,
            similarity: top.similarity,
        }))
    }
}

/// Distill a question into a keyword query: lowercase, strip punctuation,
/// drop stop words and short tokens. Falls back to the raw question when
/// too little survives.
pub fn prepare_query(question: &str) -> String {
    let lowered = question.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() > 2 && !is_stop_word(token))
        .collect();

    let query = tokens.join(" ");
    if query.chars().count() < MIN_QUERY_CHARS {
        question.to_string()
    } else {
        query
    }
}

/// Truncate a stored answer, appending an ellipsis when cut.
fn truncate_answer(content: &str) -> String {
    if content.chars().count() <= ANSWER_MAX_CHARS {
        return content.to_string();
    }
    let truncated: String = content.chars().take(ANSWER_MAX_CHARS).collect();
    format!("{truncated}...")
}

/// Stop words spanning English, Russian and German.
fn is_stop_word(token: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        // English
        "the", "and", "for", "are", "was", "were", "what", "when", "where", "which", "who",
        "why", "how", "does", "did", "can", "could", "should", "would", "will", "with",
        "this", "that", "these", "those", "from", "into", "have", "has", "had", "not",
        "but", "you", "your", "they", "their", "them", "its", "our", "out", "about",
        // Russian
        "это", "как", "что", "или", "для", "при", "его", "она", "они", "оно", "все",
        "был", "была", "были", "чем", "так", "уже", "где", "когда", "почему", "какой",
        "может", "можно", "есть", "если", "нет", "них", "тот",
        // German
        "der", "die", "das", "und", "ist", "von", "mit", "auf", "ein", "eine", "einen",
        "wie", "was", "wann", "warum", "welche", "kann", "sind", "wird", "nicht", "auch",
        "dass", "sich", "den", "dem", "des", "oder", "aber", "bei",
    ];
    STOP_WORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_prep_drops_stopwords_and_short_tokens() {
        let query = prepare_query("What are the best drip coffee makers?");
        assert_eq!(query, "best drip coffee makers");
    }

    #[test]
    fn query_prep_handles_russian() {
        let query = prepare_query("Как выбрать кофеварку для дома?");
        assert_eq!(query, "выбрать кофеварку дома");
    }

    #[test]
    fn short_residual_falls_back_to_raw_question() {
        // Everything is a stop word or too short, residual < 6 chars.
        let query = prepare_query("How is it?");
        assert_eq!(query, "How is it?");
    }

    #[test]
    fn answers_truncate_at_limit() {
        let long = "x".repeat(1_500);
        let truncated = truncate_answer(&long);
        assert_eq!(truncated.chars().count(), 1_003);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_answer("short"), "short");
    }

    #[test]
    fn match_request_serializes() {
        let request = MatchRequest {
            query_embedding: &[0.1, 0.2],
            match_count: 5,
            match_threshold: 0.55,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("query_embedding"));
        assert!(json.contains("match_threshold"));
    }
}

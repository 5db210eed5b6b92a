// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Prompt construction and artifact post-processing live in the domain layer.
//
// Naming convention: Base* for trait names (e.g., BaseChat, BaseSerpFetcher)

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::domains::generations::models::{AnsweredQuestion, SerpEntry};
use openrouter_client::{Message, Usage};

// =============================================================================
// Web search + scraping (Firecrawl)
// =============================================================================

/// One organic search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub description: String,
}

/// Scrape output. Failures are carried as an error string so callers never
/// have to unwind across a bad page.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: Option<Value>,
    pub error: Option<String>,
}

#[async_trait]
pub trait BaseWebSearch: Send + Sync {
    /// Run a localized web search, best results first.
    async fn search(
        &self,
        query: &str,
        region: &str,
        language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait BaseWebScraper: Send + Sync {
    /// Scrape one page. Never errors; a failed fetch fills `error`.
    async fn scrape(&self, url: &str) -> ScrapeResult;
}

/// Callback invoked as each SERP entry completes, returning the persistence
/// future to await before moving on.
pub type SerpProgress<'a> = &'a (dyn Fn(SerpEntry, usize) -> BoxFuture<'static, ()> + Send + Sync);

#[async_trait]
pub trait BaseSerpFetcher: Send + Sync {
    /// Search, scrape and normalize up to ten competitor pages for a query.
    ///
    /// `on_progress` runs after each entry (successful or failed) completes.
    async fn fetch_serp(
        &self,
        query: &str,
        region: &str,
        language: &str,
        on_progress: SerpProgress<'_>,
    ) -> Result<Vec<SerpEntry>>;
}

// =============================================================================
// LLM chat (OpenRouter)
// =============================================================================

#[async_trait]
pub trait BaseChat: Send + Sync {
    /// One chat completion; returns the assistant message content.
    async fn chat(&self, messages: Vec<Message>, temperature: f32, max_tokens: u32)
        -> Result<String>;

    /// Accumulated token usage across calls on this client.
    fn token_usage(&self, reset: bool) -> Usage {
        let _ = reset;
        Usage::default()
    }
}

// =============================================================================
// Vector similarity (Supabase + embeddings)
// =============================================================================

/// One matched document from the vector store.
#[derive(Debug, Clone)]
pub struct DocumentMatch {
    pub content: String,
    pub metadata: Value,
    pub similarity: f32,
}

#[async_trait]
pub trait BaseEmbedding: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait BaseVectorSearch: Send + Sync {
    /// Nearest-neighbour lookup, filtered to `similarity >= min_similarity`.
    async fn match_documents(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<DocumentMatch>>;
}

#[async_trait]
pub trait BaseAnswerFinder: Send + Sync {
    /// Answer one research question from the vector store, or report that
    /// nothing cleared the similarity floor.
    async fn find_answer(&self, question: &str) -> Result<Option<AnsweredQuestion>>;
}

// =============================================================================
// Per-job provider construction
// =============================================================================

/// Decrypted provider credentials for one principal.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub openrouter: Option<String>,
    pub supabase: Option<String>,
    pub firecrawl: Option<String>,
}

/// Builds provider clients for one job invocation from the owning
/// principal's decrypted credentials.
///
/// Returns `None` when the needed credential is missing; the stage runner
/// turns that into a configuration failure naming the credential.
pub trait ProviderFactory: Send + Sync {
    fn serp_fetcher(&self, credentials: &ProviderCredentials)
        -> Option<Arc<dyn BaseSerpFetcher>>;

    fn chat(&self, credentials: &ProviderCredentials) -> Option<Arc<dyn BaseChat>>;

    fn answer_finder(&self, credentials: &ProviderCredentials)
        -> Option<Arc<dyn BaseAnswerFinder>>;
}

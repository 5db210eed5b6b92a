//! Mock provider implementations for tests.
//!
//! These mirror the production clients behind the same `Base*` traits so
//! pipeline and route tests run without any network or broker.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::traits::{
    BaseAnswerFinder, BaseChat, BaseSerpFetcher, ProviderCredentials, ProviderFactory,
    SerpProgress,
};
use crate::domains::generations::models::{AnsweredQuestion, SerpEntry};
use openrouter_client::{Message, Usage};

// =============================================================================
// SERP fetcher
// =============================================================================

/// SERP fetcher returning a fixed entry list, driving `on_progress` for each.
#[derive(Default)]
pub struct MockSerpFetcher {
    entries: Vec<SerpEntry>,
    fail_with: Option<String>,
}

impl MockSerpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(mut self, entries: Vec<SerpEntry>) -> Self {
        self.entries = entries;
        self
    }

    /// Make `fetch_serp` fail outright.
    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.fail_with = Some(error.into());
        self
    }

    /// Ten plausible entries with word counts 1000..1900.
    pub fn standard_entries() -> Vec<SerpEntry> {
        (0..10)
            .map(|i| SerpEntry {
                url: format!("https://competitor-{i}.example/article"),
                title: format!("Competitor article {i}"),
                rank: i + 1,
                headings: vec![
                    "h1: Competitor title".to_string(),
                    "h2: Section".to_string(),
                ],
                body_text: "coffee ".repeat(50).trim().to_string(),
                word_count: 1000 + i * 100,
                error: None,
            })
            .collect()
    }
}

#[async_trait]
impl BaseSerpFetcher for MockSerpFetcher {
    async fn fetch_serp(
        &self,
        _query: &str,
        _region: &str,
        _language: &str,
        on_progress: SerpProgress<'_>,
    ) -> Result<Vec<SerpEntry>> {
        if let Some(error) = &self.fail_with {
            return Err(anyhow!("{error}"));
        }

        for (index, entry) in self.entries.iter().enumerate() {
            on_progress(entry.clone(), index).await;
        }
        Ok(self.entries.clone())
    }
}

// =============================================================================
// Chat
// =============================================================================

type ChatHandler = dyn Fn(&[Message]) -> Result<String> + Send + Sync;

/// Chat mock driven by a handler closure inspecting the prompt.
pub struct MockChat {
    handler: Arc<ChatHandler>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockChat {
    /// Respond via a closure receiving the full message list.
    pub fn respond_with<F>(handler: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always return the same content.
    pub fn always(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::respond_with(move |_| Ok(content.clone()))
    }

    /// Always fail, simulating a provider outage.
    pub fn failing(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::respond_with(move |_| Err(anyhow!("{error}")))
    }

    /// Number of chat calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Message lists from every call, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BaseChat for MockChat {
    async fn chat(
        &self,
        messages: Vec<Message>,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        let response = (self.handler)(&messages);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages);
        response
    }

    fn token_usage(&self, _reset: bool) -> Usage {
        Usage::default()
    }
}

// =============================================================================
// Answer finder
// =============================================================================

/// Answer finder backed by a question → answer map.
#[derive(Default)]
pub struct MockAnswerFinder {
    answers: HashMap<String, AnsweredQuestion>,
}

impl MockAnswerFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(
        mut self,
        question: impl Into<String>,
        answer: impl Into<String>,
        source: impl Into<String>,
        similarity: f32,
    ) -> Self {
        let question = question.into();
        self.answers.insert(
            question.clone(),
            AnsweredQuestion {
                question,
                answer: answer.into(),
                source: source.into(),
                similarity,
            },
        );
        self
    }
}

#[async_trait]
impl BaseAnswerFinder for MockAnswerFinder {
    async fn find_answer(&self, question: &str) -> Result<Option<AnsweredQuestion>> {
        Ok(self.answers.get(question).cloned())
    }
}

// =============================================================================
// Provider factory
// =============================================================================

/// Factory handing out the configured mocks, still gated on credential
/// presence so configuration-error paths stay testable.
#[derive(Default)]
pub struct TestProviders {
    pub serp: Option<Arc<MockSerpFetcher>>,
    pub chat: Option<Arc<MockChat>>,
    pub answers: Option<Arc<MockAnswerFinder>>,
}

impl TestProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serp(mut self, serp: MockSerpFetcher) -> Self {
        self.serp = Some(Arc::new(serp));
        self
    }

    pub fn chat(mut self, chat: MockChat) -> Self {
        self.chat = Some(Arc::new(chat));
        self
    }

    pub fn answers(mut self, answers: MockAnswerFinder) -> Self {
        self.answers = Some(Arc::new(answers));
        self
    }
}

impl ProviderFactory for TestProviders {
    fn serp_fetcher(
        &self,
        credentials: &ProviderCredentials,
    ) -> Option<Arc<dyn BaseSerpFetcher>> {
        credentials.firecrawl.as_ref()?;
        self.serp
            .clone()
            .map(|serp| serp as Arc<dyn BaseSerpFetcher>)
    }

    fn chat(&self, credentials: &ProviderCredentials) -> Option<Arc<dyn BaseChat>> {
        credentials.openrouter.as_ref()?;
        self.chat.clone().map(|chat| chat as Arc<dyn BaseChat>)
    }

    fn answer_finder(
        &self,
        credentials: &ProviderCredentials,
    ) -> Option<Arc<dyn BaseAnswerFinder>> {
        credentials.supabase.as_ref()?;
        self.answers
            .clone()
            .map(|answers| answers as Arc<dyn BaseAnswerFinder>)
    }
}

/// Credentials with every provider key present.
pub fn full_credentials() -> ProviderCredentials {
    ProviderCredentials {
        openrouter: Some("test-openrouter-key".into()),
        supabase: Some("test-supabase-key".into()),
        firecrawl: Some("test-firecrawl-key".into()),
    }
}

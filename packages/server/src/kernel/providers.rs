//! Production provider wiring.
//!
//! Clients are built per job invocation from the owning principal's
//! decrypted credentials; nothing provider-specific is shared between jobs.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::firecrawl_client::FirecrawlClient;
use super::serp_fetcher::SerpFetcher;
use super::supabase_client::{AnswerFinder, OpenRouterEmbedding, SupabaseVectorClient};
use super::traits::{
    BaseAnswerFinder, BaseChat, BaseSerpFetcher, ProviderCredentials, ProviderFactory,
};
use openrouter_client::{ChatRequest, Message, OpenRouterClient, Usage};

/// Chat adapter over the OpenRouter wire client.
pub struct OpenRouterChat {
    client: OpenRouterClient,
    model: String,
}

impl OpenRouterChat {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: OpenRouterClient::new(api_key),
            model,
        }
    }
}

#[async_trait]
impl BaseChat for OpenRouterChat {
    async fn chat(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let mut request = ChatRequest::new(&self.model)
            .temperature(temperature)
            .max_tokens(max_tokens);
        request.messages = messages;

        let response = self.client.chat_completion(request).await?;
        Ok(response.content)
    }

    fn token_usage(&self, reset: bool) -> Usage {
        self.client.token_usage(reset)
    }
}

/// Provider settings that are deployment configuration rather than
/// per-principal credentials.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openrouter_model: String,
    pub embeddings_url: String,
    pub embeddings_model: String,
    pub supabase_url: String,
}

/// Production factory: real HTTP clients from decrypted credentials.
pub struct ProductionProviders {
    settings: ProviderSettings,
}

impl ProductionProviders {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl ProviderFactory for ProductionProviders {
    fn serp_fetcher(
        &self,
        credentials: &ProviderCredentials,
    ) -> Option<Arc<dyn BaseSerpFetcher>> {
        let api_key = credentials.firecrawl.clone()?;
        let client = Arc::new(FirecrawlClient::new(api_key).ok()?);
        Some(Arc::new(SerpFetcher::new(client.clone(), client)))
    }

    fn chat(&self, credentials: &ProviderCredentials) -> Option<Arc<dyn BaseChat>> {
        let api_key = credentials.openrouter.clone()?;
        Some(Arc::new(OpenRouterChat::new(
            api_key,
            self.settings.openrouter_model.clone(),
        )))
    }

    fn answer_finder(
        &self,
        credentials: &ProviderCredentials,
    ) -> Option<Arc<dyn BaseAnswerFinder>> {
        let supabase_key = credentials.supabase.clone()?;
        let openrouter_key = credentials.openrouter.clone()?;

        let embedding = Arc::new(OpenRouterEmbedding::new(
            openrouter_key,
            self.settings.embeddings_url.clone(),
            self.settings.embeddings_model.clone(),
        ));
        let vectors = Arc::new(
            SupabaseVectorClient::new(self.settings.supabase_url.clone(), supabase_key).ok()?,
        );

        Some(Arc::new(AnswerFinder::new(embedding, vectors)))
    }
}

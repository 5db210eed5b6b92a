//! Firecrawl API client for web search and page scraping.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::traits::{BaseWebScraper, BaseWebSearch, ScrapeResult, SearchHit};

const BASE_URL: &str = "https://api.firecrawl.dev/v1";

/// Firecrawl client implementing both search and scrape.
pub struct FirecrawlClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lang: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchResponseHit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponseHit {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl FirecrawlClient {
    /// Create a new Firecrawl client.
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point at a different base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl BaseWebSearch for FirecrawlClient {
    async fn search(
        &self,
        query: &str,
        region: &str,
        language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let request = SearchRequest {
            query,
            limit,
            country: (!region.is_empty()).then_some(region),
            lang: (!language.is_empty()).then_some(language),
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send Firecrawl search request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Firecrawl search error {}: {}", status, body);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Firecrawl search response")?;

        Ok(parsed
            .data
            .into_iter()
            .map(|hit| SearchHit {
                url: hit.url,
                title: hit.title,
                description: hit.description,
            })
            .collect())
    }
}

#[async_trait]
impl BaseWebScraper for FirecrawlClient {
    async fn scrape(&self, url: &str) -> ScrapeResult {
        debug!(url = %url, "scraping page");

        let request = ScrapeRequest {
            url,
            formats: &["html", "markdown"],
        };

        let response = match self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ScrapeResult {
                    error: Some(format!("request failed: {e}")),
                    ..Default::default()
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ScrapeResult {
                error: Some(format!("HTTP {status}: {body}")),
                ..Default::default()
            };
        }

        let parsed: ScrapeResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return ScrapeResult {
                    error: Some(format!("bad response body: {e}")),
                    ..Default::default()
                }
            }
        };

        match parsed.data {
            Some(data) => ScrapeResult {
                markdown: data.markdown,
                html: data.html,
                metadata: data.metadata,
                error: None,
            },
            None => ScrapeResult {
                error: Some(
                    parsed
                        .error
                        .unwrap_or_else(|| "no content returned".to_string()),
                ),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_skips_empty_locale() {
        let request = SearchRequest {
            query: "best coffee makers 2024",
            limit: 10,
            country: None,
            lang: Some("en"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("country"));
        assert!(json.contains("\"lang\":\"en\""));
    }

    #[test]
    fn scrape_response_parses_without_optional_fields() {
        let parsed: ScrapeResponse =
            serde_json::from_str(r#"{"data": {"html": "<p>x</p>"}}"#).unwrap();
        let data = parsed.data.unwrap();
        assert_eq!(data.html.as_deref(), Some("<p>x</p>"));
        assert!(data.markdown.is_none());
    }
}

//! SERP ingestion: search, scrape and normalize competitor pages.
//!
//! The fetcher runs one search, scrapes each hit in order and reduces every
//! page to a normalized entry: heading outline, cleaned body text and a word
//! count. Pages that fail to scrape still produce an entry carrying the
//! error so the pipeline can account for them.

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::traits::{BaseSerpFetcher, BaseWebScraper, BaseWebSearch, SerpProgress};
use crate::domains::generations::models::SerpEntry;

/// Maximum competitor pages per query.
pub const MAX_SERP_RESULTS: usize = 10;

/// Pause between consecutive scrapes.
const SCRAPE_DELAY: Duration = Duration::from_millis(500);

/// Content containers tried in order before falling back to `body`.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    ".content",
    ".post-content",
    ".article-content",
    ".entry-content",
    "#content",
    ".main-content",
];

/// Elements whose subtrees never contribute body text.
const SKIP_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "iframe",
];

/// Production SERP fetcher: web search + per-page scraping.
pub struct SerpFetcher {
    search: Arc<dyn BaseWebSearch>,
    scraper: Arc<dyn BaseWebScraper>,
    scrape_delay: Duration,
}

impl SerpFetcher {
    pub fn new(search: Arc<dyn BaseWebSearch>, scraper: Arc<dyn BaseWebScraper>) -> Self {
        Self {
            search,
            scraper,
            scrape_delay: SCRAPE_DELAY,
        }
    }

    /// Override the inter-scrape delay (tests).
    pub fn with_scrape_delay(mut self, delay: Duration) -> Self {
        self.scrape_delay = delay;
        self
    }
}

#[async_trait]
impl BaseSerpFetcher for SerpFetcher {
    async fn fetch_serp(
        &self,
        query: &str,
        region: &str,
        language: &str,
        on_progress: SerpProgress<'_>,
    ) -> Result<Vec<SerpEntry>> {
        let hits = self
            .search
            .search(query, region, language, MAX_SERP_RESULTS)
            .await?;

        let mut entries = Vec::with_capacity(hits.len());

        for (index, hit) in hits.into_iter().take(MAX_SERP_RESULTS).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.scrape_delay).await;
            }

            let scraped = self.scraper.scrape(&hit.url).await;

            let entry = if let Some(error) = scraped.error {
                debug!(url = %hit.url, error = %error, "scrape failed");
                SerpEntry {
                    url: hit.url,
                    title: hit.title,
                    rank: (index + 1) as i32,
                    headings: Vec::new(),
                    body_text: String::new(),
                    word_count: 0,
                    error: Some(error),
                }
            } else if let Some(html) = scraped.html {
                let page = extract_page(&html);
                SerpEntry {
                    url: hit.url,
                    title: hit.title,
                    rank: (index + 1) as i32,
                    headings: page.headings,
                    word_count: page.word_count,
                    body_text: page.body_text,
                    error: None,
                }
            } else if let Some(markdown) = scraped.markdown {
                let page = extract_from_markdown(&markdown);
                SerpEntry {
                    url: hit.url,
                    title: hit.title,
                    rank: (index + 1) as i32,
                    headings: page.headings,
                    word_count: page.word_count,
                    body_text: page.body_text,
                    error: None,
                }
            } else {
                SerpEntry {
                    url: hit.url,
                    title: hit.title,
                    rank: (index + 1) as i32,
                    headings: Vec::new(),
                    body_text: String::new(),
                    word_count: 0,
                    error: Some("scrape returned no content".to_string()),
                }
            };

            on_progress(entry.clone(), index).await;
            entries.push(entry);
        }

        Ok(entries)
    }
}

/// Extracted page structure.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub headings: Vec<String>,
    pub body_text: String,
    pub word_count: i32,
}

/// Reduce raw HTML to its heading outline and cleaned body text.
pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let headings = collect_headings(&document);
    let body_text = extract_body_text(&document);
    let word_count = body_text.split_whitespace().count() as i32;

    ExtractedPage {
        headings,
        body_text,
        word_count,
    }
}

/// Collect h1..h6 in document order as `"hN: text"` strings.
fn collect_headings(document: &Html) -> Vec<String> {
    let selector = match Selector::parse("h1, h2, h3, h4, h5, h6") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|el| {
            let text = normalize_whitespace(&el.text().collect::<String>());
            if text.is_empty() {
                return None;
            }
            Some(format!("{}: {}", el.value().name(), text))
        })
        .collect()
}

/// Pick the main content container and flatten it to cleaned text.
fn extract_body_text(document: &Html) -> String {
    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(container) = document.select(&selector).next() {
                let text = clean_element_text(container);
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }

    // Fallback: whole body.
    if let Ok(selector) = Selector::parse("body") {
        if let Some(body) = document.select(&selector).next() {
            return clean_element_text(body);
        }
    }

    String::new()
}

/// Collect the visible text of an element, skipping boilerplate and ad
/// subtrees, then normalize and filter the character set.
fn clean_element_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    walk_text(element, &mut raw);
    filter_charset(&normalize_whitespace(&raw))
}

fn walk_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if should_skip(&child_el) {
                continue;
            }
            walk_text(child_el, out);
        }
    }
}

fn should_skip(element: &ElementRef<'_>) -> bool {
    let name = element.value().name();
    if SKIP_ELEMENTS.contains(&name) {
        return true;
    }

    // Ad markers in class or id.
    let is_ad_token = |token: &str| {
        let token = token.to_ascii_lowercase();
        token == "ad" || token == "ads" || token.contains("advert")
    };

    if element.value().classes().any(is_ad_token) {
        return true;
    }
    if element.value().id().map(is_ad_token).unwrap_or(false) {
        return true;
    }

    false
}

/// Collapse all whitespace runs into single spaces.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep BMP Latin and Cyrillic text (plus digits, punctuation and spaces);
/// drop everything else.
fn filter_charset(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if c as u32 > 0xFFFF {
                return false;
            }
            c == ' '
                || c.is_ascii_graphic()
                || ('\u{00C0}'..='\u{024F}').contains(&c) // Latin supplement + extended
                || ('\u{0400}'..='\u{04FF}').contains(&c) // Cyrillic
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fallback extraction when the scraper only returned markdown.
fn extract_from_markdown(markdown: &str) -> ExtractedPage {
    let mut headings = Vec::new();
    let mut body_lines = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim();
        let level = trimmed.chars().take_while(|&c| c == '#').count();
        if (1..=6).contains(&level) {
            let text = trimmed[level..].trim();
            if !text.is_empty() {
                headings.push(format!("h{level}: {text}"));
            }
        } else if !trimmed.is_empty() {
            body_lines.push(trimmed);
        }
    }

    let body_text = filter_charset(&normalize_whitespace(&body_lines.join(" ")));
    let word_count = body_text.split_whitespace().count() as i32;

    ExtractedPage {
        headings,
        body_text,
        word_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head><title>t</title><style>.x{}</style></head>
          <body>
            <nav>Home | About</nav>
            <header>Site header</header>
            <h1>Best Coffee Makers</h1>
            <article>
              <h2>Drip machines</h2>
              <p>Drip machines brew 1000 cups.</p>
              <div class="advertisement">Buy now!!!</div>
              <script>var x = 1;</script>
              <h3>Budget picks</h3>
              <p>Cheap and cheerful. Дешево и сердито. 咖啡</p>
            </article>
            <footer>copyright</footer>
          </body>
        </html>
    "#;

    #[test]
    fn headings_in_document_order() {
        let page = extract_page(PAGE);
        assert_eq!(
            page.headings,
            vec![
                "h1: Best Coffee Makers",
                "h2: Drip machines",
                "h3: Budget picks",
            ]
        );
    }

    #[test]
    fn body_prefers_article_and_skips_boilerplate() {
        let page = extract_page(PAGE);
        assert!(page.body_text.contains("Drip machines brew 1000 cups."));
        assert!(!page.body_text.contains("Home | About"));
        assert!(!page.body_text.contains("Buy now"));
        assert!(!page.body_text.contains("var x"));
        assert!(!page.body_text.contains("copyright"));
    }

    #[test]
    fn charset_filter_keeps_latin_and_cyrillic() {
        let page = extract_page(PAGE);
        assert!(page.body_text.contains("Дешево и сердито."));
        assert!(!page.body_text.contains('咖'));
    }

    #[test]
    fn word_count_counts_whitespace_tokens() {
        let cleaned = filter_charset("one  two\nthree");
        assert_eq!(cleaned, "one two three");
        assert_eq!(cleaned.split_whitespace().count(), 3);
    }

    #[test]
    fn falls_back_to_body_without_content_container() {
        let page = extract_page("<html><body><p>just a paragraph</p></body></html>");
        assert_eq!(page.body_text, "just a paragraph");
        assert_eq!(page.word_count, 3);
    }

    #[test]
    fn markdown_fallback_extracts_outline() {
        let page = extract_from_markdown("# Title\n\nSome intro.\n\n## Section\n\nMore text.");
        assert_eq!(page.headings, vec!["h1: Title", "h2: Section"]);
        assert!(page.body_text.contains("Some intro."));
        assert_eq!(page.word_count, 4);
    }
}

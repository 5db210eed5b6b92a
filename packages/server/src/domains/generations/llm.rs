//! LLM-backed article operations.
//!
//! Each operation is one chat call plus deterministic post-processing. The
//! wire client stays dumb; everything that normalizes or repairs model
//! output happens here, in plain code, where it can be unit tested.

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::links::{extract_markdown_links, force_append_link, url_present};
use super::models::{Block, BlockType, Generation, SerpEntry, StructureAnalysis};
use super::prompts;
use crate::kernel::traits::BaseChat;
use openrouter_client::Message;

/// Minimum acceptable structure size.
const MIN_STRUCTURE_BLOCKS: usize = 5;

/// Maximum research questions per block.
const MAX_QUESTIONS_PER_BLOCK: usize = 5;

/// SEO field length caps.
const SEO_TITLE_MAX: usize = 60;
const SEO_DESCRIPTION_MAX: usize = 160;

/// One quality-review finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTask {
    pub block_id: i32,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
}

/// Article operations over a chat provider.
pub struct ArticleOps {
    chat: Arc<dyn BaseChat>,
}

impl ArticleOps {
    pub fn new(chat: Arc<dyn BaseChat>) -> Self {
        Self { chat }
    }

    async fn ask(&self, system: String, user: String, temperature: f32) -> Result<String> {
        self.chat
            .chat(
                vec![Message::system(system), Message::user(user)],
                temperature,
                4096,
            )
            .await
    }

    /// Operation 1: structure analysis from competitor SERP entries.
    pub async fn analyze_structure(
        &self,
        generation: &Generation,
        entries: &[SerpEntry],
    ) -> Result<StructureAnalysis> {
        let (system, user) = prompts::structure_analysis(generation, entries);
        let raw = self.ask(system, user, 0.3).await?;

        let mut analysis: StructureAnalysis =
            parse_json_response(&raw).context("structure analysis returned malformed JSON")?;

        normalize_blocks(&mut analysis.recommended_structure);

        if analysis.recommended_structure.len() < MIN_STRUCTURE_BLOCKS {
            bail!(
                "structure analysis produced {} blocks, need at least {}",
                analysis.recommended_structure.len(),
                MIN_STRUCTURE_BLOCKS
            );
        }

        let h1_count = analysis
            .recommended_structure
            .iter()
            .filter(|b| b.block_type == BlockType::H1)
            .count();
        if h1_count != 1 {
            bail!("structure analysis produced {h1_count} h1 blocks, need exactly one");
        }

        Ok(analysis)
    }

    /// Operation 2: block enrichment.
    pub async fn enrich_blocks(
        &self,
        generation: &Generation,
        blocks: &[Block],
    ) -> Result<Vec<Block>> {
        let (system, user) = prompts::block_enrichment(generation, blocks);
        let raw = self.ask(system, user, 0.4).await?;

        let mut enriched: Vec<Block> =
            parse_json_response(&raw).context("block enrichment returned malformed JSON")?;

        if enriched.is_empty() {
            bail!("block enrichment returned an empty block list");
        }

        normalize_blocks(&mut enriched);
        Ok(enriched)
    }

    /// Operation 3: write one block, fed the article so far as style context.
    pub async fn write_block(
        &self,
        generation: &Generation,
        block: &Block,
        prior_article: &str,
    ) -> Result<String> {
        let (system, user) = prompts::block_writing(generation, block, prior_article);
        let raw = self.ask(system, user, 0.7).await?;
        Ok(strip_leading_heading(&raw))
    }

    /// Operation 5: rewrite one block to carry its links, then verify and
    /// repair. Every URL must survive verbatim (trailing slash optional);
    /// missing links are force-appended.
    pub async fn insert_links(
        &self,
        block_content: &str,
        links: &[(String, String)],
    ) -> Result<String> {
        let (system, user) = prompts::link_insertion(block_content, links);
        let mut rewritten = self.ask(system, user, 0.3).await?.trim().to_string();

        for (anchor, url) in links {
            if !url_present(&rewritten, url) {
                warn!(url = %url, "link missing after rewrite, force-appending");
                rewritten = force_append_link(&rewritten, anchor, url);
            }
        }

        Ok(rewritten)
    }

    /// Operation 6: quality review, padded to at least three tasks when the
    /// model under-delivers.
    pub async fn review_quality(
        &self,
        main_keyword: &str,
        blocks: &[Block],
    ) -> Result<Vec<ReviewTask>> {
        let (system, user) = prompts::quality_review(main_keyword, blocks);
        let raw = self.ask(system, user, 0.3).await?;

        let mut tasks: Vec<ReviewTask> =
            parse_json_response(&raw).context("quality review returned malformed JSON")?;

        if tasks.len() < 2 {
            pad_review_tasks(&mut tasks, blocks);
        }

        Ok(tasks)
    }

    /// Operation 7: fix one block; markdown links present before the fix
    /// must survive it.
    pub async fn fix_block(
        &self,
        block: &Block,
        issues: &[String],
        suggestion: &str,
    ) -> Result<String> {
        let inventory = extract_markdown_links(block.content.as_deref().unwrap_or(""));

        let (system, user) = prompts::block_fix(block, issues, suggestion);
        let mut fixed = self.ask(system, user, 0.5).await?.trim().to_string();
        fixed = strip_leading_heading(&fixed);

        for (anchor, url) in &inventory {
            if !url_present(&fixed, url) {
                warn!(url = %url, "link lost during fix, force-appending");
                fixed = force_append_link(&fixed, anchor, url);
            }
        }

        Ok(fixed)
    }

    /// Operation 8: SEO metadata. Never fails; falls back to a generic
    /// title/description pair.
    pub async fn seo_metadata(&self, main_keyword: &str, article: &str) -> (String, String) {
        #[derive(Deserialize)]
        struct SeoResponse {
            #[serde(default)]
            title: String,
            #[serde(default)]
            description: String,
        }

        let (system, user) = prompts::seo_metadata(main_keyword, article);
        let parsed: Option<SeoResponse> = match self.ask(system, user, 0.3).await {
            Ok(raw) => parse_json_response(&raw).ok(),
            Err(e) => {
                warn!(error = %e, "SEO metadata call failed, using fallback");
                None
            }
        };

        match parsed {
            Some(seo) if !seo.title.is_empty() => (
                truncate_chars(&seo.title, SEO_TITLE_MAX),
                truncate_chars(&seo.description, SEO_DESCRIPTION_MAX),
            ),
            _ => (
                truncate_chars(main_keyword, SEO_TITLE_MAX),
                truncate_chars(
                    &format!("Comprehensive guide about {main_keyword}"),
                    SEO_DESCRIPTION_MAX,
                ),
            ),
        }
    }
}

// =============================================================================
// Post-processing helpers
// =============================================================================

/// Renumber ids contiguously from 0, blank the intro heading, and strip
/// questions from block types that never carry them.
fn normalize_blocks(blocks: &mut [Block]) {
    for (index, block) in blocks.iter_mut().enumerate() {
        block.id = index as i32;

        if block.block_type == BlockType::Intro {
            block.heading = String::new();
        }

        if !block.block_type.carries_questions() {
            block.questions = None;
        } else if let Some(questions) = &mut block.questions {
            questions.truncate(MAX_QUESTIONS_PER_BLOCK);
            if questions.is_empty() {
                block.questions = None;
            }
        }
    }
}

/// Pad a short review to at least three tasks with synthetic findings on
/// randomly chosen content blocks.
fn pad_review_tasks(tasks: &mut Vec<ReviewTask>, blocks: &[Block]) {
    let mut candidates: Vec<i32> = blocks
        .iter()
        .filter(|b| matches!(b.block_type, BlockType::H2 | BlockType::H3))
        .map(|b| b.id)
        .filter(|id| !tasks.iter().any(|t| t.block_id == *id))
        .collect();

    if candidates.is_empty() {
        candidates = blocks
            .iter()
            .filter(|b| b.block_type != BlockType::H1)
            .map(|b| b.id)
            .collect();
    }

    let mut rng = rand::thread_rng();
    candidates.shuffle(&mut rng);

    let mut next = candidates.into_iter();
    while tasks.len() < 3 {
        let Some(block_id) = next.next() else { break };
        tasks.push(ReviewTask {
            block_id,
            issues: vec!["Section could use more specific detail".to_string()],
            suggestion: "Tighten the copy and add concrete examples".to_string(),
        });
    }
}

/// Parse JSON out of a chat response, tolerating code fences and prose
/// around the payload.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();

    // Direct parse first.
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Ok(parsed);
    }

    // Strip a ```json fence.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```"))
        .map(|(inner, _)| inner.trim());
    if let Some(inner) = unfenced {
        if let Ok(parsed) = serde_json::from_str(inner) {
            return Ok(parsed);
        }
    }

    // Last resort: widest brace/bracket span.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(parsed) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(parsed);
                }
            }
        }
    }

    debug!(preview = %&trimmed[..trimmed.len().min(200)], "unparseable LLM response");
    bail!("response is not valid JSON")
}

/// Drop an accidental leading markdown heading from generated body text.
pub fn strip_leading_heading(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with('#') {
        return trimmed.to_string();
    }

    match trimmed.split_once('\n') {
        Some((_, rest)) => rest.trim_start().to_string(),
        None => String::new(),
    }
}

/// Truncate to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::MockChat;
    use crate::domains::generations::models::ArticleType;
    use uuid::Uuid;

    fn generation() -> Generation {
        Generation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "best coffee makers 2024".into(),
            ArticleType::Informational,
            vec![],
            "en".into(),
            "us".into(),
            vec![],
            None,
            true,
            vec![],
        )
    }

    fn structure_json(block_count: usize) -> String {
        let mut blocks = vec![
            serde_json::json!({"type": "h1", "heading": "Best Coffee Makers"}),
            serde_json::json!({"type": "intro", "heading": "Introduction", "questions": ["q?"]}),
        ];
        for i in 0..block_count.saturating_sub(4) {
            blocks.push(serde_json::json!({
                "type": "h2",
                "heading": format!("Section {i}"),
                "questions": ["one?", "two?", "three?", "four?", "five?", "six?"]
            }));
        }
        blocks.push(serde_json::json!({"type": "conclusion", "heading": "Conclusion", "questions": ["q?"]}));
        blocks.push(serde_json::json!({"type": "faq", "heading": "FAQ"}));

        serde_json::json!({
            "averageWordCount": 1500,
            "commonPatterns": ["listicles"],
            "strengths": [],
            "weaknesses": [],
            "recommendedStructure": blocks
        })
        .to_string()
    }

    #[tokio::test]
    async fn structure_analysis_normalizes_blocks() {
        let chat = Arc::new(MockChat::always(structure_json(6)));
        let ops = ArticleOps::new(chat);

        let analysis = ops
            .analyze_structure(&generation(), &[])
            .await
            .expect("analysis should succeed");

        let blocks = &analysis.recommended_structure;
        assert_eq!(blocks.len(), 6);

        // Contiguous ids from zero.
        let ids: Vec<i32> = blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

        // Intro heading forced empty; no questions outside content blocks.
        let intro = &blocks[1];
        assert_eq!(intro.block_type, BlockType::Intro);
        assert!(intro.heading.is_empty());
        assert!(intro.questions.is_none());
        assert!(blocks[4].questions.is_none()); // conclusion

        // Question cap applied to content blocks.
        let h2 = &blocks[2];
        assert_eq!(h2.questions.as_ref().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn structure_analysis_rejects_small_outlines() {
        let chat = Arc::new(MockChat::always(structure_json(4)));
        let ops = ArticleOps::new(chat);
        let error = ops.analyze_structure(&generation(), &[]).await.unwrap_err();
        assert!(error.to_string().contains("at least 5"));
    }

    #[tokio::test]
    async fn insert_links_force_appends_missing_urls() {
        // Model "refuses" to include the link.
        let chat = Arc::new(MockChat::always("Rewritten text without any link."));
        let ops = ArticleOps::new(chat);

        let links = vec![("shop".to_string(), "https://shop.example/coffee".to_string())];
        let result = ops.insert_links("Original text.", &links).await.unwrap();

        assert!(result.ends_with("[shop](https://shop.example/coffee)"));
    }

    #[tokio::test]
    async fn fix_block_preserves_link_inventory() {
        let chat = Arc::new(MockChat::always("Cleaner text, links dropped."));
        let ops = ArticleOps::new(chat);

        let block = Block {
            id: 2,
            block_type: BlockType::H2,
            heading: "Section".into(),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: Some("Text with [shop](https://shop.example/coffee).".into()),
        };

        let fixed = ops
            .fix_block(&block, &["too vague".into()], "be concrete")
            .await
            .unwrap();
        assert!(fixed.contains("https://shop.example/coffee"));
    }

    #[tokio::test]
    async fn review_pads_to_three_tasks() {
        let chat = Arc::new(MockChat::always("[]"));
        let ops = ArticleOps::new(chat);

        let blocks: Vec<Block> = (0..5)
            .map(|i| Block {
                id: i,
                block_type: if i == 0 { BlockType::H1 } else { BlockType::H2 },
                heading: format!("H{i}"),
                instruction: String::new(),
                lsi_keywords: vec![],
                questions: None,
                answered_questions: None,
                content: Some("text".into()),
            })
            .collect();

        let tasks = ops.review_quality("kw", &blocks).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.block_id != 0));
    }

    #[tokio::test]
    async fn seo_falls_back_on_provider_failure() {
        let chat = Arc::new(MockChat::failing("HTTP 500"));
        let ops = ArticleOps::new(chat);

        let (title, description) = ops.seo_metadata("best coffee makers 2024", "article").await;
        assert_eq!(title, "best coffee makers 2024");
        assert!(description.starts_with("Comprehensive guide about"));
        assert!(title.chars().count() <= 60);
        assert!(description.chars().count() <= 160);
    }

    #[test]
    fn json_parsing_tolerates_fences_and_prose() {
        #[derive(Deserialize)]
        struct Payload {
            x: i32,
        }

        let fenced = "```json\n{\"x\": 1}\n```";
        assert_eq!(parse_json_response::<Payload>(fenced).unwrap().x, 1);

        let prose = "Here is the JSON you asked for:\n{\"x\": 2}\nHope that helps!";
        assert_eq!(parse_json_response::<Payload>(prose).unwrap().x, 2);

        assert!(parse_json_response::<Payload>("no json here").is_err());
    }

    #[test]
    fn leading_heading_is_stripped() {
        assert_eq!(
            strip_leading_heading("## Drip machines\n\nBody text."),
            "Body text."
        );
        assert_eq!(strip_leading_heading("Body only."), "Body only.");
        assert_eq!(strip_leading_heading("# Heading only"), "");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("кофеварка", 4), "кофе");
        assert_eq!(truncate_chars("short", 60), "short");
    }
}

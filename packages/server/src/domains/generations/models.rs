//! Generation record and its artifact types.
//!
//! The generation is the central entity: an immutable configuration plus
//! runtime state and accumulated artifacts from the seven pipeline stages.
//! Wire names are camelCase to match the API surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Job status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Queued,
    Processing,
    ParsingSerp,
    AnalyzingStructure,
    EnrichingBlocks,
    AnsweringQuestions,
    WritingArticle,
    InsertingLinks,
    ReviewingArticle,
    PausedAfterSerp,
    PausedAfterStructure,
    PausedAfterBlocks,
    PausedAfterAnswers,
    PausedAfterWriting,
    PausedAfterReview,
    Completed,
    Failed,
}

impl GenerationStatus {
    /// Stable snake_case label, as stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Queued => "queued",
            GenerationStatus::Processing => "processing",
            GenerationStatus::ParsingSerp => "parsing_serp",
            GenerationStatus::AnalyzingStructure => "analyzing_structure",
            GenerationStatus::EnrichingBlocks => "enriching_blocks",
            GenerationStatus::AnsweringQuestions => "answering_questions",
            GenerationStatus::WritingArticle => "writing_article",
            GenerationStatus::InsertingLinks => "inserting_links",
            GenerationStatus::ReviewingArticle => "reviewing_article",
            GenerationStatus::PausedAfterSerp => "paused_after_serp",
            GenerationStatus::PausedAfterStructure => "paused_after_structure",
            GenerationStatus::PausedAfterBlocks => "paused_after_blocks",
            GenerationStatus::PausedAfterAnswers => "paused_after_answers",
            GenerationStatus::PausedAfterWriting => "paused_after_writing",
            GenerationStatus::PausedAfterReview => "paused_after_review",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Parse the stored label.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    /// True for the six stage-boundary pause points.
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            GenerationStatus::PausedAfterSerp
                | GenerationStatus::PausedAfterStructure
                | GenerationStatus::PausedAfterBlocks
                | GenerationStatus::PausedAfterAnswers
                | GenerationStatus::PausedAfterWriting
                | GenerationStatus::PausedAfterReview
        )
    }

    /// True once the job can never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

/// Log entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Thinking,
}

/// Article type tag, a closed set of eight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleType {
    Informational,
    Howto,
    Listicle,
    Review,
    Comparison,
    News,
    Commercial,
    Faq,
}

/// Structural role of an article block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    H1,
    Intro,
    H2,
    H3,
    Conclusion,
    Faq,
}

impl BlockType {
    /// Block types that carry research questions. Only content sections do;
    /// `h1`, `intro`, `conclusion` and `faq` never carry them.
    pub fn carries_questions(&self) -> bool {
        matches!(self, BlockType::H2 | BlockType::H3)
    }
}

/// How an internal link is rendered inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDisplay {
    #[serde(rename = "inline")]
    Inline,
    #[serde(rename = "list-start")]
    ListStart,
    #[serde(rename = "list-end")]
    ListEnd,
    #[serde(rename = "sidebar")]
    Sidebar,
}

/// Where an internal link should land in the article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPosition {
    Intro,
    Body,
    Conclusion,
    Any,
}

// =============================================================================
// Artifacts
// =============================================================================

/// One append-only log line on a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
            additional_data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// One scraped competitor page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerpEntry {
    pub url: String,
    pub title: String,
    pub rank: i32,
    pub headings: Vec<String>,
    pub body_text: String,
    pub word_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One answered research question with its retrieval provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
    pub source: String,
    pub similarity: f32,
}

/// One structural unit of the article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    pub id: i32,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub lsi_keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_questions: Option<Vec<AnsweredQuestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Block {
    /// Render the block back to markdown from its type, heading and
    /// written content.
    pub fn render_markdown(&self) -> String {
        let content = self.content.as_deref().unwrap_or("").trim();
        match self.block_type {
            BlockType::H1 => {
                if content.is_empty() {
                    format!("# {}", self.heading)
                } else {
                    format!("# {}\n\n{}", self.heading, content)
                }
            }
            BlockType::Intro => content.to_string(),
            BlockType::H2 | BlockType::Conclusion | BlockType::Faq => {
                format!("## {}\n\n{}", self.heading, content)
            }
            BlockType::H3 => format!("### {}\n\n{}", self.heading, content),
        }
    }
}

/// Assemble the full article from the ordered block list.
pub fn assemble_article(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(Block::render_markdown)
        .filter(|section| !section.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Competitor structure analysis produced by stage 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureAnalysis {
    pub average_word_count: i32,
    #[serde(default)]
    pub common_patterns: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommended_structure: Vec<Block>,
}

/// Internal-link descriptor from the job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalLink {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default)]
    pub anchorless: bool,
    pub display_type: LinkDisplay,
    pub position: LinkPosition,
}

impl InternalLink {
    /// The text rendered as the anchor: the configured anchor, or the URL
    /// itself for anchorless links.
    pub fn anchor_text(&self) -> &str {
        if self.anchorless {
            return &self.url;
        }
        self.anchor.as_deref().unwrap_or(&self.url)
    }
}

// =============================================================================
// Generation record
// =============================================================================

/// The durable job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,

    // Immutable configuration
    pub main_keyword: String,
    pub article_type: ArticleType,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub language: String,
    pub region: String,
    #[serde(default)]
    pub lsi_keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_comment: Option<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub internal_links: Vec<InternalLink>,

    // Runtime state
    pub status: GenerationStatus,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,

    // Artifacts
    #[serde(default)]
    pub serp_results: Vec<SerpEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure_analysis: Option<StructureAnalysis>,
    #[serde(default)]
    pub article_blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Generation {
    /// Build a fresh queued generation from its configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: Uuid,
        user_id: Uuid,
        main_keyword: String,
        article_type: ArticleType,
        keywords: Vec<String>,
        language: String,
        region: String,
        lsi_keywords: Vec<String>,
        style_comment: Option<String>,
        continuous: bool,
        internal_links: Vec<InternalLink>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            user_id,
            main_keyword,
            article_type,
            keywords,
            language,
            region,
            lsi_keywords,
            style_comment,
            continuous,
            internal_links,
            status: GenerationStatus::Queued,
            progress: 0,
            current_step: None,
            logs: Vec::new(),
            serp_results: Vec::new(),
            structure_analysis: None,
            article_blocks: Vec::new(),
            article: None,
            seo_title: None,
            seo_description: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_roundtrip() {
        for status in [
            GenerationStatus::Queued,
            GenerationStatus::ParsingSerp,
            GenerationStatus::PausedAfterAnswers,
            GenerationStatus::Completed,
        ] {
            let parsed = GenerationStatus::parse(status.as_str()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(GenerationStatus::parse("generating_blocks").is_none());
    }

    #[test]
    fn pause_and_terminal_classification() {
        assert!(GenerationStatus::PausedAfterSerp.is_paused());
        assert!(!GenerationStatus::ParsingSerp.is_paused());
        assert!(GenerationStatus::Failed.is_terminal());
        assert!(!GenerationStatus::Queued.is_terminal());
    }

    #[test]
    fn question_carrying_block_types() {
        assert!(!BlockType::H1.carries_questions());
        assert!(!BlockType::Intro.carries_questions());
        assert!(!BlockType::Conclusion.carries_questions());
        assert!(!BlockType::Faq.carries_questions());
        assert!(BlockType::H2.carries_questions());
        assert!(BlockType::H3.carries_questions());
    }

    #[test]
    fn link_display_wire_names() {
        let json = serde_json::to_string(&LinkDisplay::ListStart).unwrap();
        assert_eq!(json, "\"list-start\"");
        let parsed: LinkDisplay = serde_json::from_str("\"sidebar\"").unwrap();
        assert_eq!(parsed, LinkDisplay::Sidebar);
    }

    #[test]
    fn anchorless_links_use_url_as_anchor() {
        let link = InternalLink {
            url: "https://shop.example/coffee".into(),
            anchor: Some("shop".into()),
            anchorless: true,
            display_type: LinkDisplay::Inline,
            position: LinkPosition::Body,
        };
        assert_eq!(link.anchor_text(), "https://shop.example/coffee");
    }

    #[test]
    fn block_markdown_rendering() {
        let h1 = Block {
            id: 0,
            block_type: BlockType::H1,
            heading: "Best Coffee Makers".into(),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: None,
        };
        assert_eq!(h1.render_markdown(), "# Best Coffee Makers");

        let intro = Block {
            id: 1,
            block_type: BlockType::Intro,
            heading: String::new(),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: Some("Opening paragraph.".into()),
        };
        assert_eq!(intro.render_markdown(), "Opening paragraph.");

        let h2 = Block {
            id: 2,
            block_type: BlockType::H2,
            heading: "Drip machines".into(),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: Some("Details.".into()),
        };
        assert_eq!(h2.render_markdown(), "## Drip machines\n\nDetails.");

        let article = assemble_article(&[h1, intro, h2]);
        assert!(article.starts_with("# Best Coffee Makers"));
        assert!(article.contains("Opening paragraph."));
        assert!(article.ends_with("Details."));
    }

    #[test]
    fn generation_json_is_camel_case() {
        let generation = Generation::new(
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
        );
        let value = serde_json::to_value(&generation).unwrap();
        assert!(value.get("mainKeyword").is_some());
        assert!(value.get("articleType").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["status"], "queued");
    }
}

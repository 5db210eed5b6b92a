//! Prompt construction for the article pipeline's LLM operations.
//!
//! Prompts are plain string builders; all response post-processing lives in
//! the operations layer, never here.

use super::models::{ArticleType, Block, BlockType, Generation, SerpEntry};

fn article_type_label(article_type: ArticleType) -> &'static str {
    match article_type {
        ArticleType::Informational => "informational guide",
        ArticleType::Howto => "step-by-step how-to",
        ArticleType::Listicle => "listicle",
        ArticleType::Review => "product review",
        ArticleType::Comparison => "comparison",
        ArticleType::News => "news piece",
        ArticleType::Commercial => "commercial landing article",
        ArticleType::Faq => "FAQ article",
    }
}

/// Stage 2: competitor structure analysis.
pub fn structure_analysis(generation: &Generation, entries: &[SerpEntry]) -> (String, String) {
    let system = "You are an expert SEO content strategist. You analyze competitor article \
                  structures and design an outline that outperforms them. Respond with a single \
                  JSON object and nothing else."
        .to_string();

    let mut competitors = String::new();
    for entry in entries.iter().filter(|e| e.error.is_none()) {
        competitors.push_str(&format!(
            "Rank {} — {} ({} words)\nOutline:\n{}\n\n",
            entry.rank,
            entry.title,
            entry.word_count,
            entry.headings.join("\n")
        ));
    }

    let user = format!(
        "Main keyword: {keyword}\n\
         Language: {language}\n\
         Article type: {article_type}\n\
         Extra keywords: {keywords}\n\
         LSI keywords: {lsi}\n\
         Style notes: {style}\n\n\
         Competitor structures:\n{competitors}\
         Design the article structure. Return JSON with this exact shape:\n\
         {{\"averageWordCount\": number, \"commonPatterns\": [string], \"strengths\": [string], \
         \"weaknesses\": [string], \"recommendedStructure\": [{{\"id\": number, \"type\": \
         \"h1|intro|h2|h3|conclusion|faq\", \"heading\": string, \"instruction\": string, \
         \"lsiKeywords\": [string]}}]}}\n\
         Requirements: exactly one h1 block, one intro block with an empty heading, at least \
         five blocks total, headings in {language}.",
        keyword = generation.main_keyword,
        language = generation.language,
        article_type = article_type_label(generation.article_type),
        keywords = generation.keywords.join(", "),
        lsi = generation.lsi_keywords.join(", "),
        style = generation.style_comment.as_deref().unwrap_or("none"),
        competitors = competitors,
    );

    (system, user)
}

/// Stage 3: block enrichment.
pub fn block_enrichment(generation: &Generation, blocks: &[Block]) -> (String, String) {
    let system = "You are an expert SEO content planner. You expand outline blocks with \
                  detailed writing instructions and short research questions. Respond with a \
                  single JSON array and nothing else."
        .to_string();

    let user = format!(
        "Main keyword: {keyword}\nLanguage: {language}\n\n\
         Current blocks:\n{blocks}\n\n\
         For every block, rewrite \"instruction\" so a copywriter could write the section \
         without further context, and add up to five short research questions to content \
         blocks (type h2 or h3) as a \"questions\" array. Keep ids, types and headings. \
         Return the full JSON array of blocks.",
        keyword = generation.main_keyword,
        language = generation.language,
        blocks = serde_json::to_string_pretty(blocks).unwrap_or_default(),
    );

    (system, user)
}

/// Stage 5: write one block.
pub fn block_writing(
    generation: &Generation,
    block: &Block,
    prior_article: &str,
) -> (String, String) {
    let system = format!(
        "You are a professional {language} copywriter producing a {article_type} in markdown. \
         Match the voice of the article so far. Write body text only: never start with a \
         markdown heading, the heading is rendered separately.",
        language = generation.language,
        article_type = article_type_label(generation.article_type),
    );

    let role_instruction = match block.block_type {
        BlockType::H1 => "Write a one-paragraph hook directly under the article title.",
        BlockType::Intro => {
            "Write the article introduction: set up the topic, promise the reader a concrete \
             outcome, and preview the structure."
        }
        BlockType::H2 | BlockType::H3 => {
            "Write this section in full. Use short paragraphs; bullet lists are welcome where \
             they help scanning."
        }
        BlockType::Conclusion => {
            "Write the conclusion: summarize the key takeaways and close with a clear next step."
        }
        BlockType::Faq => {
            "Write the FAQ section as bolded questions followed by concise answers."
        }
    };

    let mut research = String::new();
    if let Some(answered) = &block.answered_questions {
        for a in answered {
            research.push_str(&format!(
                "Q: {}\nA: {} (source: {})\n",
                a.question, a.answer, a.source
            ));
        }
    }

    let user = format!(
        "Main keyword: {keyword}\n\
         Section heading: {heading}\n\
         Writing instruction: {instruction}\n\
         LSI keywords to weave in: {lsi}\n\
         {research_part}\
         Article so far:\n---\n{prior}\n---\n\n\
         {role_instruction}",
        keyword = generation.main_keyword,
        heading = block.heading,
        instruction = block.instruction,
        lsi = block.lsi_keywords.join(", "),
        research_part = if research.is_empty() {
            String::new()
        } else {
            format!("Research findings:\n{research}\n")
        },
        prior = prior_article,
        role_instruction = role_instruction,
    );

    (system, user)
}

/// Stage 6: rewrite one block to carry its assigned links.
pub fn link_insertion(block_content: &str, links: &[(String, String)]) -> (String, String) {
    let system = "You are an editor weaving internal links into existing markdown copy. \
                  Preserve the text's meaning and tone. Every link must appear exactly as \
                  given, as a markdown link. Respond with the rewritten markdown only."
        .to_string();

    let link_list = links
        .iter()
        .map(|(anchor, url)| format!("- [{anchor}]({url})"))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Links to incorporate (anchor text and URL must stay verbatim):\n{link_list}\n\n\
         Text:\n---\n{block_content}\n---"
    );

    (system, user)
}

/// Stage 7: quality review.
pub fn quality_review(main_keyword: &str, blocks: &[Block]) -> (String, String) {
    let system = "You are a senior content editor reviewing an article for quality issues. \
                  Respond with a single JSON array and nothing else."
        .to_string();

    let rendered: String = blocks
        .iter()
        .map(|b| {
            format!(
                "[block {}] {}\n{}\n",
                b.id,
                b.heading,
                b.content.as_deref().unwrap_or("")
            )
        })
        .collect();

    let user = format!(
        "Main keyword: {main_keyword}\n\nArticle blocks:\n{rendered}\n\
         List the weakest blocks with concrete problems. Return JSON: \
         [{{\"blockId\": number, \"issues\": [string], \"suggestion\": string}}]"
    );

    (system, user)
}

/// Stage 7: fix one block.
pub fn block_fix(block: &Block, issues: &[String], suggestion: &str) -> (String, String) {
    let system = "You are a copy editor revising one section of an article. Fix the listed \
                  issues without changing the section's scope. Keep every existing markdown \
                  link. Respond with the revised markdown only."
        .to_string();

    let user = format!(
        "Section heading: {heading}\n\
         Issues:\n{issues}\n\
         Suggestion: {suggestion}\n\n\
         Current text:\n---\n{content}\n---",
        heading = block.heading,
        issues = issues
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n"),
        suggestion = suggestion,
        content = block.content.as_deref().unwrap_or(""),
    );

    (system, user)
}

/// Stage 7: SEO metadata.
pub fn seo_metadata(main_keyword: &str, article: &str) -> (String, String) {
    let system = "You are an SEO specialist writing metadata. Respond with a single JSON \
                  object and nothing else."
        .to_string();

    let user = format!(
        "Main keyword: {main_keyword}\n\nArticle:\n---\n{article}\n---\n\n\
         Write an SEO title (at most 60 characters) and meta description (at most 160 \
         characters). Return JSON: {{\"title\": string, \"description\": string}}"
    );

    (system, user)
}

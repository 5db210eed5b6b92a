//! The seven-stage article pipeline.
//!
//! The runner drives one generation through its stages, persisting every
//! artifact before a pause or terminal transition. Pause points sit at
//! stage boundaries: in non-continuous mode the runner parks the job and
//! returns the worker slot after every stage except link insertion.
//!
//! Stage map:
//!   1 SERP ingestion       -> paused_after_serp
//!   2 structure analysis   -> paused_after_structure
//!   3 block enrichment     -> paused_after_blocks
//!   4 question answering   -> paused_after_answers
//!   5 article writing      -> paused_after_writing
//!   6 link insertion       (never pauses, failures are warnings)
//!   7 review + SEO         -> paused_after_review
//!
//! Resuming from `paused_after_review` completes the job without re-running
//! any stage.

pub mod context;

pub use context::StageContext;

use anyhow::{anyhow, bail, Context as _, Result};
use futures::future::BoxFuture;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::links::select_link_blocks;
use super::llm::ArticleOps;
use super::models::{
    assemble_article, Generation, GenerationStatus, LogLevel, SerpEntry,
};
use super::store::GenerationStore;
use crate::kernel::event_bus::EventBus;
use crate::kernel::metrics;
use crate::kernel::serp_fetcher::MAX_SERP_RESULTS;
use crate::kernel::traits::{BaseChat, ProviderCredentials, ProviderFactory};

/// Fallback competitor word count when no entry yields a usable one.
const DEFAULT_AVERAGE_WORD_COUNT: i32 = 2_000;

/// Pacing delays between outbound calls.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delay between per-question vector searches (stage 4).
    pub question_delay: Duration,
    /// Delay between block writes (stage 5).
    pub block_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            question_delay: Duration::from_millis(300),
            block_delay: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// No pacing delays (tests).
    pub fn immediate() -> Self {
        Self {
            question_delay: Duration::ZERO,
            block_delay: Duration::ZERO,
        }
    }
}

/// Drives generations through the pipeline.
pub struct StageRunner {
    store: Arc<dyn GenerationStore>,
    events: EventBus,
    providers: Arc<dyn ProviderFactory>,
    config: PipelineConfig,
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        events: EventBus,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            store,
            events,
            providers,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one generation, optionally resuming from a pause state.
    ///
    /// Errors propagate to the queue layer for its retry decision after the
    /// job has been transitioned to `failed`.
    pub async fn run(
        &self,
        generation_id: Uuid,
        credentials: &ProviderCredentials,
        continue_from: Option<GenerationStatus>,
    ) -> Result<()> {
        let ctx = StageContext::new(generation_id, self.store.clone(), self.events.clone());

        let result = self.run_stages(&ctx, generation_id, credentials, continue_from).await;

        if let Err(e) = &result {
            let message = format!("{e:#}");
            ctx.log(LogLevel::Error, message.clone()).await;
            if let Err(persist) = self.store.set_error(generation_id, &message).await {
                warn!(generation_id = %generation_id, error = %persist, "failed to persist error");
            }
            let _ = ctx
                .set_status(GenerationStatus::Failed, None, Some("failed"))
                .await;
            ctx.publish_error(&message).await;
            metrics::job_finished("failed");
        }

        result
    }

    async fn run_stages(
        &self,
        ctx: &StageContext,
        generation_id: Uuid,
        credentials: &ProviderCredentials,
        continue_from: Option<GenerationStatus>,
    ) -> Result<()> {
        let mut generation = self
            .store
            .fetch(generation_id)
            .await?
            .ok_or_else(|| anyhow!("generation {generation_id} not found"))?;

        let first_stage = match continue_from {
            None => 1,
            Some(GenerationStatus::PausedAfterSerp) => 2,
            Some(GenerationStatus::PausedAfterStructure) => 3,
            Some(GenerationStatus::PausedAfterBlocks) => 4,
            Some(GenerationStatus::PausedAfterAnswers) => 5,
            Some(GenerationStatus::PausedAfterWriting) => 6,
            Some(GenerationStatus::PausedAfterReview) => 8,
            Some(other) => bail!("cannot resume from status {}", other.as_str()),
        };

        // Chat client is shared across stages so token counters accumulate
        // for the whole invocation.
        let chat = self.providers.chat(credentials);

        if first_stage == 1 {
            self.store.mark_started(generation_id).await?;
            ctx.set_status(GenerationStatus::Processing, Some(0), Some("starting"))
                .await?;
            ctx.log(
                LogLevel::Info,
                format!("Starting article generation for \"{}\"", generation.main_keyword),
            )
            .await;
        } else {
            ctx.log(
                LogLevel::Info,
                format!(
                    "Resuming article generation from {}",
                    continue_from.map(|s| s.as_str()).unwrap_or("start")
                ),
            )
            .await;
        }

        for stage in first_stage..=7 {
            // Link insertion only applies when links are configured.
            if stage == 6 && generation.internal_links.is_empty() {
                continue;
            }

            let started = Instant::now();
            match stage {
                1 => self.stage_serp(ctx, &mut generation, credentials).await?,
                2 => self.stage_structure(ctx, &mut generation, chat.as_ref()).await?,
                3 => self.stage_enrich(ctx, &mut generation, chat.as_ref()).await?,
                4 => self.stage_answers(ctx, &mut generation, credentials).await?,
                5 => self.stage_write(ctx, &mut generation, chat.as_ref()).await?,
                6 => self.stage_links(ctx, &mut generation, chat.as_ref()).await,
                7 => self.stage_review(ctx, &mut generation, chat.as_ref()).await?,
                _ => unreachable!(),
            }

            ctx.log_with_data(
                LogLevel::Debug,
                format!("Stage {stage} finished"),
                Some(json!({ "elapsedMs": started.elapsed().as_millis() as u64 })),
            )
            .await;

            // Pause at the stage boundary unless the job runs continuously.
            // Link insertion never pauses.
            if stage != 6 && !generation.continuous {
                let pause = match stage {
                    1 => GenerationStatus::PausedAfterSerp,
                    2 => GenerationStatus::PausedAfterStructure,
                    3 => GenerationStatus::PausedAfterBlocks,
                    4 => GenerationStatus::PausedAfterAnswers,
                    5 => GenerationStatus::PausedAfterWriting,
                    7 => GenerationStatus::PausedAfterReview,
                    _ => unreachable!(),
                };
                ctx.set_status(pause, None, Some("paused")).await?;
                ctx.log(
                    LogLevel::Info,
                    format!("Paused at {} awaiting continue", pause.as_str()),
                )
                .await;
                self.flush_token_usage(ctx, chat.as_deref()).await;
                return Ok(());
            }
        }

        // Terminal: assemble already happened in stages 5-7.
        let article = generation.article.clone().unwrap_or_default();
        self.store.mark_completed(generation_id).await?;
        ctx.set_status(GenerationStatus::Completed, Some(100), Some("completed"))
            .await?;
        ctx.log(LogLevel::Info, "Article generation completed").await;
        ctx.publish_completed(
            &article,
            generation.seo_title.as_deref().unwrap_or_default(),
            generation.seo_description.as_deref().unwrap_or_default(),
        )
        .await;
        self.flush_token_usage(ctx, chat.as_deref()).await;
        metrics::job_finished("completed");

        Ok(())
    }

    async fn flush_token_usage(&self, ctx: &StageContext, chat: Option<&dyn BaseChat>) {
        let Some(chat) = chat else { return };
        let usage = chat.token_usage(true);
        if usage.total_tokens == 0 {
            return;
        }
        metrics::llm_tokens(usage.prompt_tokens, usage.completion_tokens);
        ctx.log_with_data(
            LogLevel::Debug,
            format!("LLM token usage: {} total", usage.total_tokens),
            Some(json!({
                "promptTokens": usage.prompt_tokens,
                "completionTokens": usage.completion_tokens,
                "totalTokens": usage.total_tokens,
            })),
        )
        .await;
    }

    // =========================================================================
    // Stage 1: SERP ingestion
    // =========================================================================

    async fn stage_serp(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        credentials: &ProviderCredentials,
    ) -> Result<()> {
        let fetcher = self
            .providers
            .serp_fetcher(credentials)
            .ok_or_else(|| anyhow!("Firecrawl API key is not configured"))?;

        ctx.set_status(
            GenerationStatus::ParsingSerp,
            Some(10),
            Some("parsing SERP"),
        )
        .await?;
        ctx.log(
            LogLevel::Info,
            format!("Fetching top search results for \"{}\"", generation.main_keyword),
        )
        .await;

        let progress_ctx = ctx.clone();
        let on_progress = move |entry: SerpEntry, index: usize| -> BoxFuture<'static, ()> {
            let ctx = progress_ctx.clone();
            Box::pin(async move {
                if let Err(e) = ctx.push_serp_result(&entry).await {
                    warn!(error = %e, "failed to persist SERP entry");
                }

                let progress = 10 + (((index + 1) * 40) / MAX_SERP_RESULTS) as i32;
                let _ = ctx
                    .set_progress(GenerationStatus::ParsingSerp, progress)
                    .await;

                match &entry.error {
                    Some(error) => {
                        ctx.log(
                            LogLevel::Warn,
                            format!("Failed to parse {}: {error}", entry.url),
                        )
                        .await
                    }
                    None => {
                        ctx.log(
                            LogLevel::Info,
                            format!(
                                "Parsed result {}: {} ({} words)",
                                entry.rank, entry.url, entry.word_count
                            ),
                        )
                        .await
                    }
                }
            })
        };

        let entries = fetcher
            .fetch_serp(
                &generation.main_keyword,
                &generation.region,
                &generation.language,
                &on_progress,
            )
            .await
            .context("SERP parsing failed")?;

        let usable: Vec<i32> = entries
            .iter()
            .filter(|e| e.error.is_none() && e.word_count > 0)
            .map(|e| e.word_count)
            .collect();
        let average_word_count = if usable.is_empty() {
            DEFAULT_AVERAGE_WORD_COUNT
        } else {
            usable.iter().sum::<i32>() / usable.len() as i32
        };

        ctx.log_with_data(
            LogLevel::Info,
            format!(
                "SERP parsing complete: {} results, average {} words",
                entries.len(),
                average_word_count
            ),
            Some(json!({ "averageWordCount": average_word_count })),
        )
        .await;

        generation.serp_results = entries;
        Ok(())
    }

    // =========================================================================
    // Stage 2: structure analysis
    // =========================================================================

    async fn stage_structure(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) -> Result<()> {
        let chat = chat.ok_or_else(|| anyhow!("OpenRouter API key is not configured"))?;

        ctx.set_status(
            GenerationStatus::AnalyzingStructure,
            Some(55),
            Some("analyzing structure"),
        )
        .await?;
        ctx.log(LogLevel::Info, "Analyzing competitor structures").await;

        let ops = ArticleOps::new(chat.clone());
        let analysis = ops
            .analyze_structure(generation, &generation.serp_results)
            .await
            .context("Structure analysis failed")?;

        let blocks = analysis.recommended_structure.clone();
        self.store
            .set_structure(ctx.generation_id, &analysis, &blocks)
            .await?;
        ctx.set_progress(GenerationStatus::AnalyzingStructure, 65)
            .await?;
        ctx.publish_blocks(&blocks).await;
        ctx.log(
            LogLevel::Info,
            format!("Structure ready: {} blocks planned", blocks.len()),
        )
        .await;

        generation.structure_analysis = Some(analysis);
        generation.article_blocks = blocks;
        Ok(())
    }

    // =========================================================================
    // Stage 3: block enrichment
    // =========================================================================

    async fn stage_enrich(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) -> Result<()> {
        let chat = chat.ok_or_else(|| anyhow!("OpenRouter API key is not configured"))?;

        ctx.set_status(
            GenerationStatus::EnrichingBlocks,
            Some(75),
            Some("enriching blocks"),
        )
        .await?;
        ctx.log(LogLevel::Info, "Enriching blocks with instructions and research questions")
            .await;

        let ops = ArticleOps::new(chat.clone());
        let enriched = ops
            .enrich_blocks(generation, &generation.article_blocks)
            .await
            .context("Block enrichment failed")?;

        ctx.set_blocks(&enriched).await?;
        ctx.set_progress(GenerationStatus::EnrichingBlocks, 85)
            .await?;

        let question_count: usize = enriched
            .iter()
            .filter_map(|b| b.questions.as_ref().map(Vec::len))
            .sum();
        ctx.log(
            LogLevel::Info,
            format!("Blocks enriched: {} research questions planned", question_count),
        )
        .await;

        generation.article_blocks = enriched;
        Ok(())
    }

    // =========================================================================
    // Stage 4: question answering
    // =========================================================================

    async fn stage_answers(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        credentials: &ProviderCredentials,
    ) -> Result<()> {
        let finder = self
            .providers
            .answer_finder(credentials)
            .ok_or_else(|| anyhow!("Supabase credential is not configured"))?;

        ctx.set_status(
            GenerationStatus::AnsweringQuestions,
            Some(90),
            Some("answering questions"),
        )
        .await?;
        ctx.log(LogLevel::Info, "Researching answers for block questions")
            .await;

        let mut blocks = generation.article_blocks.clone();
        let mut first_search = true;

        for i in 0..blocks.len() {
            let Some(questions) = blocks[i].questions.clone() else {
                continue;
            };
            if questions.is_empty() {
                continue;
            }

            let mut answered = Vec::new();
            for question in &questions {
                if !first_search {
                    tokio::time::sleep(self.config.question_delay).await;
                }
                first_search = false;

                if let Some(found) = finder
                    .find_answer(question)
                    .await
                    .context("Question answering failed")?
                {
                    answered.push(found);
                }
            }

            ctx.log(
                LogLevel::Info,
                format!(
                    "Block {}: answered {}/{} questions",
                    blocks[i].id,
                    answered.len(),
                    questions.len()
                ),
            )
            .await;

            // Unanswered questions are pruned; the surviving list mirrors
            // what was actually answered.
            blocks[i].questions = Some(answered.iter().map(|a| a.question.clone()).collect());
            blocks[i].answered_questions = Some(answered);

            ctx.set_blocks(&blocks).await?;
        }

        ctx.set_progress(GenerationStatus::AnsweringQuestions, 95)
            .await?;

        generation.article_blocks = blocks;
        Ok(())
    }

    // =========================================================================
    // Stage 5: article writing
    // =========================================================================

    async fn stage_write(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) -> Result<()> {
        let chat = chat.ok_or_else(|| anyhow!("OpenRouter API key is not configured"))?;

        ctx.set_status(
            GenerationStatus::WritingArticle,
            Some(97),
            Some("writing article"),
        )
        .await?;
        ctx.log(LogLevel::Info, "Writing article blocks").await;

        let ops = ArticleOps::new(chat.clone());
        let mut blocks = generation.article_blocks.clone();
        let mut article = String::new();

        for index in 0..blocks.len() {
            if index > 0 {
                tokio::time::sleep(self.config.block_delay).await;
            }

            let content = ops
                .write_block(generation, &blocks[index], &article)
                .await
                .with_context(|| format!("Writing block {} failed", blocks[index].id))?;

            blocks[index].content = Some(content);

            let rendered = blocks[index].render_markdown();
            if !article.is_empty() {
                article.push_str("\n\n");
            }
            article.push_str(&rendered);

            ctx.set_blocks(&blocks).await?;
            ctx.log(
                LogLevel::Thinking,
                format!(
                    "Wrote block {} ({}/{})",
                    blocks[index].id,
                    index + 1,
                    blocks.len()
                ),
            )
            .await;
        }

        self.store.set_article(ctx.generation_id, &article).await?;
        ctx.set_progress(GenerationStatus::WritingArticle, 99).await?;
        ctx.log(
            LogLevel::Info,
            format!(
                "Article draft complete: {} words",
                article.split_whitespace().count()
            ),
        )
        .await;

        generation.article_blocks = blocks;
        generation.article = Some(article);
        Ok(())
    }

    // =========================================================================
    // Stage 6: link insertion (optional, never fatal)
    // =========================================================================

    async fn stage_links(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) {
        if let Err(e) = self.try_stage_links(ctx, generation, chat).await {
            ctx.log(
                LogLevel::Warn,
                format!("Link insertion failed, continuing without it: {e:#}"),
            )
            .await;
        }
    }

    async fn try_stage_links(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) -> Result<()> {
        let chat = chat.ok_or_else(|| anyhow!("OpenRouter API key is not configured"))?;

        // Progress already sits at 99 after writing; link insertion changes
        // neither status nor progress.
        ctx.log(
            LogLevel::Info,
            format!("Inserting {} internal links", generation.internal_links.len()),
        )
        .await;

        let ops = ArticleOps::new(chat.clone());
        let mut blocks = generation.article_blocks.clone();

        let assignments = select_link_blocks(&generation.internal_links, &blocks);

        let mut by_block: HashMap<i32, Vec<(String, String)>> = HashMap::new();
        for assignment in &assignments {
            by_block.entry(assignment.block_id).or_default().push((
                assignment.link.anchor_text().to_string(),
                assignment.link.url.clone(),
            ));
        }

        // Deterministic block order keeps runs reproducible.
        let mut target_ids: Vec<i32> = by_block.keys().copied().collect();
        target_ids.sort_unstable();

        for block_id in target_ids {
            let links = &by_block[&block_id];
            let Some(block) = blocks.iter_mut().find(|b| b.id == block_id) else {
                continue;
            };

            let current = block.content.clone().unwrap_or_default();
            let rewritten = ops.insert_links(&current, links).await?;
            block.content = Some(rewritten);

            ctx.log(
                LogLevel::Info,
                format!("Inserted {} link(s) into block {block_id}", links.len()),
            )
            .await;
        }

        let article = assemble_article(&blocks);
        ctx.set_blocks(&blocks).await?;
        self.store.set_article(ctx.generation_id, &article).await?;

        generation.article_blocks = blocks;
        generation.article = Some(article);
        Ok(())
    }

    // =========================================================================
    // Stage 7: review + SEO
    // =========================================================================

    async fn stage_review(
        &self,
        ctx: &StageContext,
        generation: &mut Generation,
        chat: Option<&Arc<dyn BaseChat>>,
    ) -> Result<()> {
        let chat = chat.ok_or_else(|| anyhow!("OpenRouter API key is not configured"))?;

        ctx.set_status(
            GenerationStatus::ReviewingArticle,
            Some(99),
            Some("reviewing article"),
        )
        .await?;
        ctx.log(LogLevel::Info, "Reviewing article quality").await;

        let ops = ArticleOps::new(chat.clone());
        let mut blocks = generation.article_blocks.clone();

        let tasks = ops
            .review_quality(&generation.main_keyword, &blocks)
            .await
            .context("Quality review failed")?;

        for task in &tasks {
            let Some(block) = blocks.iter_mut().find(|b| b.id == task.block_id) else {
                continue;
            };

            let fixed = ops
                .fix_block(block, &task.issues, &task.suggestion)
                .await
                .with_context(|| format!("Fixing block {} failed", task.block_id))?;
            block.content = Some(fixed);
        }

        let article = assemble_article(&blocks);
        ctx.set_blocks(&blocks).await?;
        self.store.set_article(ctx.generation_id, &article).await?;
        ctx.log(
            LogLevel::Info,
            format!("Review complete: {} blocks revised", tasks.len()),
        )
        .await;

        let (title, description) = ops.seo_metadata(&generation.main_keyword, &article).await;
        self.store
            .set_seo(ctx.generation_id, &title, &description)
            .await?;
        ctx.log(LogLevel::Info, format!("SEO metadata ready: \"{title}\"")).await;

        generation.article_blocks = blocks;
        generation.article = Some(article);
        generation.seo_title = Some(title);
        generation.seo_description = Some(description);

        info!(generation_id = %ctx.generation_id, "review stage finished");
        Ok(())
    }
}

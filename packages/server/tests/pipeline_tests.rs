//! End-to-end pipeline scenarios against in-memory stores and scripted
//! provider mocks.

mod common;

use common::{
    scripted_chat, scripted_chat_custom, shop_link, standard_answers, PipelineHarness,
};
use draftforge::domains::generations::models::{BlockType, GenerationStatus, LogLevel};
use draftforge::domains::generations::GenerationStore;
use draftforge::kernel::test_dependencies::{
    MockAnswerFinder, MockChat, MockSerpFetcher, TestProviders,
};
use draftforge::kernel::traits::ProviderCredentials;
use serde_json::json;

// =============================================================================
// Scenario 1: happy path, continuous mode
// =============================================================================

#[tokio::test]
async fn continuous_run_completes_with_all_artifacts() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let generation = harness.insert_generation(true, vec![shop_link()]).await;

    harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await
        .expect("pipeline should complete");

    let done = harness.store.fetch(generation.id).await.unwrap().unwrap();

    assert_eq!(done.status, GenerationStatus::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.completed_at.is_some());
    assert!(done.started_at.is_some());

    // SERP artifacts
    assert_eq!(done.serp_results.len(), 10);
    assert!(done.structure_analysis.is_some());

    // Blocks: at least five, exactly one h1, unique ids.
    assert!(done.article_blocks.len() >= 5);
    let h1_count = done
        .article_blocks
        .iter()
        .filter(|b| b.block_type == BlockType::H1)
        .count();
    assert_eq!(h1_count, 1);
    let mut ids: Vec<i32> = done.article_blocks.iter().map(|b| b.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), done.article_blocks.len());

    // Article and link integrity.
    let article = done.article.expect("article text");
    assert!(!article.trim().is_empty());
    assert!(article.contains("https://shop.example/coffee"));

    // SEO caps.
    assert!(done.seo_title.unwrap().chars().count() <= 60);
    assert!(done.seo_description.unwrap().chars().count() <= 160);

    // Log instants are non-decreasing.
    let instants: Vec<_> = done.logs.iter().map(|l| l.at).collect();
    assert!(instants.windows(2).all(|w| w[0] <= w[1]));

    // Terminal completion event with the article payload.
    let completed: Vec<_> = harness
        .events()
        .into_iter()
        .filter(|e| e.event == "generation:completed")
        .collect();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].data["article"]
        .as_str()
        .unwrap()
        .contains("https://shop.example/coffee"));
}

#[tokio::test]
async fn questions_are_pruned_to_answered_subset() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let generation = harness.insert_generation(true, vec![]).await;

    harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await
        .unwrap();

    let done = harness.store.fetch(generation.id).await.unwrap().unwrap();

    for block in &done.article_blocks {
        let questions: Vec<String> = block.questions.clone().unwrap_or_default();
        let answered: Vec<String> = block
            .answered_questions
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.question)
            .collect();
        assert_eq!(questions, answered, "block {} questions", block.id);
    }

    // The enrichment planted one unanswerable question on block 3; it must
    // be gone.
    let espresso = done.article_blocks.iter().find(|b| b.id == 3).unwrap();
    let remaining = espresso.questions.clone().unwrap_or_default();
    assert_eq!(remaining, vec!["What grind size works best for espresso?"]);
}

// =============================================================================
// Scenario 2: pause/resume at every boundary
// =============================================================================

#[tokio::test]
async fn pause_and_resume_walks_every_boundary() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let generation = harness.insert_generation(false, vec![shop_link()]).await;

    let pauses = [
        GenerationStatus::PausedAfterSerp,
        GenerationStatus::PausedAfterStructure,
        GenerationStatus::PausedAfterBlocks,
        GenerationStatus::PausedAfterAnswers,
        GenerationStatus::PausedAfterWriting,
        GenerationStatus::PausedAfterReview,
    ];

    // First run from the start, then one continue per pause point.
    harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await
        .unwrap();

    for (index, expected_pause) in pauses.iter().enumerate() {
        let paused = harness.store.fetch(generation.id).await.unwrap().unwrap();
        assert_eq!(paused.status, *expected_pause, "after run {}", index + 1);

        harness
            .runner
            .run(generation.id, &harness.credentials, Some(*expected_pause))
            .await
            .unwrap();
    }

    let done = harness.store.fetch(generation.id).await.unwrap().unwrap();
    assert_eq!(done.status, GenerationStatus::Completed);
    assert_eq!(done.progress, 100);

    // Visible status sequence, initial state first.
    let mut sequence = vec!["queued".to_string()];
    sequence.extend(harness.status_sequence());
    assert_eq!(
        sequence,
        vec![
            "queued",
            "processing",
            "parsing_serp",
            "paused_after_serp",
            "analyzing_structure",
            "paused_after_structure",
            "enriching_blocks",
            "paused_after_blocks",
            "answering_questions",
            "paused_after_answers",
            "writing_article",
            "paused_after_writing",
            "reviewing_article",
            "paused_after_review",
            "completed",
        ]
    );

    // Same terminal artifacts as the continuous run.
    assert!(done.article_blocks.len() >= 5);
    let article = done.article.expect("article text");
    assert!(article.contains("https://shop.example/coffee"));
    assert!(done.seo_title.unwrap().chars().count() <= 60);
    assert!(done.seo_description.unwrap().chars().count() <= 160);
}

// =============================================================================
// Scenario 3: provider failure during structure analysis
// =============================================================================

#[tokio::test]
async fn llm_failure_in_structure_analysis_fails_the_job() {
    let harness = PipelineHarness::with_providers(
        TestProviders::new()
            .serp(MockSerpFetcher::new().with_entries(MockSerpFetcher::standard_entries()))
            .chat(MockChat::failing("HTTP 500"))
            .answers(standard_answers()),
    );
    let generation = harness.insert_generation(true, vec![]).await;

    let result = harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await;
    assert!(result.is_err());

    let failed = harness.store.fetch(generation.id).await.unwrap().unwrap();
    assert_eq!(failed.status, GenerationStatus::Failed);
    assert!(!failed.error.as_deref().unwrap_or("").is_empty());

    assert!(failed.logs.iter().any(|l| {
        l.level == LogLevel::Error && l.message.contains("Structure analysis failed")
    }));

    // No terminal completed event was ever published.
    assert!(harness
        .event_kinds()
        .iter()
        .all(|kind| kind != "generation:completed"));
    assert!(harness
        .event_kinds()
        .iter()
        .any(|kind| kind == "generation:error"));

    // SERP artifacts from stage 1 survive the failure.
    assert_eq!(failed.serp_results.len(), 10);
}

// =============================================================================
// Scenario 4: missing vector credential at stage 4
// =============================================================================

#[tokio::test]
async fn missing_vector_credential_fails_stage_four() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let generation = harness.insert_generation(true, vec![]).await;

    let credentials = ProviderCredentials {
        supabase: None,
        ..harness.credentials.clone()
    };

    let result = harness.runner.run(generation.id, &credentials, None).await;
    assert!(result.is_err());

    let failed = harness.store.fetch(generation.id).await.unwrap().unwrap();
    assert_eq!(failed.status, GenerationStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .unwrap_or("")
        .contains("Supabase"));
    assert!(failed
        .logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message.contains("Supabase")));

    // Stages 1-3 artifacts persisted.
    assert_eq!(failed.serp_results.len(), 10);
    assert!(failed.structure_analysis.is_some());
    assert!(failed.article_blocks.len() >= 5);
    assert!(failed
        .article_blocks
        .iter()
        .any(|b| b.questions.as_ref().map(|q| !q.is_empty()).unwrap_or(false)));
}

// =============================================================================
// Scenario 5: link force-append
// =============================================================================

#[tokio::test]
async fn refused_link_is_force_appended() {
    // Structure whose last block is the conclusion, so a conclusion link
    // lands at the very end of the article.
    let structure = json!({
        "averageWordCount": 1200,
        "commonPatterns": [],
        "strengths": [],
        "weaknesses": [],
        "recommendedStructure": [
            {"type": "h1", "heading": "Best Coffee Makers 2024"},
            {"type": "intro", "heading": ""},
            {"type": "h2", "heading": "Drip coffee makers"},
            {"type": "h2", "heading": "Espresso machines"},
            {"type": "conclusion", "heading": "Which one should you buy?"}
        ]
    })
    .to_string();
    let enrichment = json!([
        {"id": 0, "type": "h1", "heading": "Best Coffee Makers 2024", "instruction": "Hook."},
        {"id": 1, "type": "intro", "heading": "", "instruction": "Promise."},
        {"id": 2, "type": "h2", "heading": "Drip coffee makers", "instruction": "Compare."},
        {"id": 3, "type": "h2", "heading": "Espresso machines", "instruction": "Cover."},
        {"id": 4, "type": "conclusion", "heading": "Which one should you buy?", "instruction": "Close."}
    ])
    .to_string();

    let harness = PipelineHarness::with_providers(
        TestProviders::new()
            .serp(MockSerpFetcher::new().with_entries(MockSerpFetcher::standard_entries()))
            .chat(scripted_chat_custom(false, structure, enrichment))
            .answers(MockAnswerFinder::new()),
    );

    let mut link = shop_link();
    link.position = draftforge::domains::generations::models::LinkPosition::Conclusion;
    let generation = harness.insert_generation(true, vec![link]).await;

    harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await
        .unwrap();

    let done = harness.store.fetch(generation.id).await.unwrap().unwrap();
    assert_eq!(done.status, GenerationStatus::Completed);

    let article = done.article.expect("article text");
    let last_line = article
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap();
    assert_eq!(last_line.trim(), "[shop](https://shop.example/coffee)");
}

// =============================================================================
// Progress and status monotonicity
// =============================================================================

#[tokio::test]
async fn progress_never_regresses_within_a_run() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let generation = harness.insert_generation(true, vec![]).await;

    harness
        .runner
        .run(generation.id, &harness.credentials, None)
        .await
        .unwrap();

    let progress_values: Vec<i64> = harness
        .events()
        .into_iter()
        .filter(|e| e.event == "generation:status")
        .filter_map(|e| e.data["progress"].as_i64())
        .collect();

    assert!(progress_values.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress_values.last().copied(), Some(100));
}

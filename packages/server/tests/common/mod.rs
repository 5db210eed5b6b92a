//! Shared test harness: in-memory stores, recording bus, scripted provider
//! mocks. No network, broker or database.

use std::sync::Arc;

use draftforge::domains::generations::models::{
    ArticleType, Generation, InternalLink, LinkDisplay, LinkPosition,
};
use draftforge::domains::generations::{
    GenerationStore, MemoryGenerationStore, PipelineConfig, StageRunner,
};
use draftforge::kernel::event_bus::{BusEvent, EventBus, EVENTS_SUBJECT};
use draftforge::kernel::nats::TestBus;
use draftforge::kernel::test_dependencies::{
    full_credentials, MockAnswerFinder, MockChat, MockSerpFetcher, TestProviders,
};
use draftforge::kernel::traits::ProviderCredentials;
use openrouter_client::Message;
use serde_json::json;
use uuid::Uuid;

/// Everything a pipeline scenario needs.
pub struct PipelineHarness {
    pub store: Arc<MemoryGenerationStore>,
    pub bus: Arc<TestBus>,
    pub runner: StageRunner,
    pub credentials: ProviderCredentials,
}

impl PipelineHarness {
    /// Standard harness: ten SERP entries, scripted chat, two answerable
    /// questions.
    pub fn new(chat: MockChat) -> Self {
        Self::with_providers(
            TestProviders::new()
                .serp(MockSerpFetcher::new().with_entries(MockSerpFetcher::standard_entries()))
                .chat(chat)
                .answers(standard_answers()),
        )
    }

    pub fn with_providers(providers: TestProviders) -> Self {
        let store = Arc::new(MemoryGenerationStore::new());
        let bus = Arc::new(TestBus::new());
        let events = EventBus::new(bus.clone());

        let runner = StageRunner::new(store.clone(), events, Arc::new(providers))
            .with_config(PipelineConfig::immediate());

        Self {
            store,
            bus,
            runner,
            credentials: full_credentials(),
        }
    }

    /// Insert a fresh generation with the scenario-1 configuration.
    pub async fn insert_generation(&self, continuous: bool, links: Vec<InternalLink>) -> Generation {
        let generation = Generation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "best coffee makers 2024".into(),
            ArticleType::Informational,
            vec!["coffee machines".into()],
            "en".into(),
            "us".into(),
            vec!["espresso".into(), "french press".into()],
            Some("friendly, practical tone".into()),
            continuous,
            links,
        );
        self.store.insert(&generation).await.unwrap();
        generation
    }

    /// Every event published to the shared subject, in order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.bus
            .messages_for_subject(EVENTS_SUBJECT)
            .iter()
            .map(|m| self.bus.deserialize_message(m).unwrap())
            .collect()
    }

    /// Status labels from `generation:status` events, consecutive
    /// duplicates collapsed.
    pub fn status_sequence(&self) -> Vec<String> {
        let mut statuses: Vec<String> = self
            .events()
            .into_iter()
            .filter(|e| e.event == "generation:status")
            .filter_map(|e| e.data["status"].as_str().map(str::to_string))
            .collect();
        statuses.dedup();
        statuses
    }

    /// Names of all published event kinds.
    pub fn event_kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

/// The single internal link used by the link scenarios.
pub fn shop_link() -> InternalLink {
    InternalLink {
        url: "https://shop.example/coffee".into(),
        anchor: Some("shop".into()),
        anchorless: false,
        display_type: LinkDisplay::Inline,
        position: LinkPosition::Body,
    }
}

/// Answer finder covering the two questions the scripted enrichment plants.
pub fn standard_answers() -> MockAnswerFinder {
    MockAnswerFinder::new()
        .with_answer(
            "How long do drip coffee makers last?",
            "Most drip machines last five to ten years with regular descaling.",
            "https://knowledge.example/drip-lifespan",
            0.82,
        )
        .with_answer(
            "What grind size works best for espresso?",
            "A fine, consistent grind slightly coarser than flour works best.",
            "https://knowledge.example/espresso-grind",
            0.77,
        )
}

/// Scripted chat with the standard seven-block structure.
pub fn scripted_chat(include_links: bool) -> MockChat {
    scripted_chat_custom(
        include_links,
        structure_response(),
        enrichment_response(),
    )
}

/// Scripted chat that answers each operation by recognizing its system
/// prompt. `include_links` controls whether the link-insertion op
/// cooperates or "refuses", leaving the force-append path to run.
pub fn scripted_chat_custom(
    include_links: bool,
    structure: String,
    enrichment: String,
) -> MockChat {
    MockChat::respond_with(move |messages: &[Message]| {
        let system = messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let user = messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if system.contains("content strategist") {
            return Ok(structure.clone());
        }
        if system.contains("content planner") {
            return Ok(enrichment.clone());
        }
        if system.contains("copywriter") {
            return Ok("This section walks through the options in plain language, \
                       comparing build quality, brew temperature and price."
                .to_string());
        }
        if system.contains("weaving internal links") {
            if include_links {
                let links: Vec<&str> = user
                    .lines()
                    .filter(|line| line.trim_start().starts_with("- ["))
                    .map(|line| line.trim_start().trim_start_matches("- "))
                    .collect();
                return Ok(format!(
                    "Rewritten copy that references {} naturally.",
                    links.join(" and ")
                ));
            }
            return Ok("Rewritten copy that conveniently forgot every link.".to_string());
        }
        if system.contains("senior content editor") {
            return Ok(json!([
                {"blockId": 2, "issues": ["Too generic"], "suggestion": "Name concrete models"},
                {"blockId": 3, "issues": ["No price anchors"], "suggestion": "Add price ranges"},
            ])
            .to_string());
        }
        if system.contains("copy editor revising") {
            return Ok("Tightened copy with concrete model names and price ranges.".to_string());
        }
        if system.contains("SEO specialist") {
            return Ok(json!({
                "title": "Best Coffee Makers 2024: Tested Picks",
                "description": "We brewed hundreds of cups to find the best coffee makers of 2024, from budget drip machines to prosumer espresso.",
            })
            .to_string());
        }

        anyhow::bail!("scripted chat got an unexpected prompt: {system}")
    })
}

pub fn structure_response() -> String {
    json!({
        "averageWordCount": 1450,
        "commonPatterns": ["listicle with buying guide"],
        "strengths": ["clear sections"],
        "weaknesses": ["thin FAQ coverage"],
        "recommendedStructure": [
            {"type": "h1", "heading": "Best Coffee Makers 2024"},
            {"type": "intro", "heading": ""},
            {"type": "h2", "heading": "Drip coffee makers"},
            {"type": "h2", "heading": "Espresso machines"},
            {"type": "h3", "heading": "Budget picks"},
            {"type": "conclusion", "heading": "Which one should you buy?"},
            {"type": "faq", "heading": "FAQ"}
        ]
    })
    .to_string()
}

pub fn enrichment_response() -> String {
    json!([
        {"id": 0, "type": "h1", "heading": "Best Coffee Makers 2024",
         "instruction": "Hook the reader with the testing scope."},
        {"id": 1, "type": "intro", "heading": "",
         "instruction": "Promise a clear recommendation per budget."},
        {"id": 2, "type": "h2", "heading": "Drip coffee makers",
         "instruction": "Compare the three best drip machines.",
         "questions": ["How long do drip coffee makers last?"]},
        {"id": 3, "type": "h2", "heading": "Espresso machines",
         "instruction": "Cover entry-level espresso.",
         "questions": ["What grind size works best for espresso?",
                        "Is a dual boiler worth it for beginners?"]},
        {"id": 4, "type": "h3", "heading": "Budget picks",
         "instruction": "List picks under $100."},
        {"id": 5, "type": "conclusion", "heading": "Which one should you buy?",
         "instruction": "Close with one pick per persona."},
        {"id": 6, "type": "faq", "heading": "FAQ",
         "instruction": "Answer the four most common questions."}
    ])
    .to_string()
}

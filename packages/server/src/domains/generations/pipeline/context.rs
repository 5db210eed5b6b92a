//! Shared stage context: every durable write that observers care about is
//! paired with a bus event here, so stages never publish by hand.

use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::domains::generations::models::{
    Block, GenerationStatus, LogEntry, LogLevel, SerpEntry,
};
use crate::domains::generations::store::GenerationStore;
use crate::kernel::event_bus::{generation_room, EventBus};

/// Per-job handle combining the durable store and the event bus.
#[derive(Clone)]
pub struct StageContext {
    pub generation_id: Uuid,
    pub store: Arc<dyn GenerationStore>,
    pub events: EventBus,
}

impl StageContext {
    pub fn new(generation_id: Uuid, store: Arc<dyn GenerationStore>, events: EventBus) -> Self {
        Self {
            generation_id,
            store,
            events,
        }
    }

    fn room(&self) -> String {
        generation_room(self.generation_id)
    }

    /// Append a log entry and mirror it to subscribers.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_with_data(level, message, None).await;
    }

    /// Append a log entry carrying a structured payload.
    pub async fn log_with_data(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        let mut entry = LogEntry::new(level, message);
        if let Some(data) = data {
            entry = entry.with_data(data);
        }

        if let Err(e) = self.store.append_log(self.generation_id, entry.clone()).await {
            tracing::error!(generation_id = %self.generation_id, error = %e, "log append failed");
        }

        self.events
            .publish(
                &self.room(),
                "generation:log",
                json!({
                    "generationId": self.generation_id,
                    "log": entry,
                }),
            )
            .await;
    }

    /// Persist a status transition and broadcast it.
    pub async fn set_status(
        &self,
        status: GenerationStatus,
        progress: Option<i32>,
        current_step: Option<&str>,
    ) -> anyhow::Result<()> {
        self.store
            .set_status(self.generation_id, status, progress, current_step)
            .await?;

        self.publish_status(status, progress).await;
        Ok(())
    }

    /// Broadcast a progress bump without changing the stored status label.
    pub async fn set_progress(
        &self,
        status: GenerationStatus,
        progress: i32,
    ) -> anyhow::Result<()> {
        self.store
            .set_status(self.generation_id, status, Some(progress), None)
            .await?;
        self.publish_status(status, Some(progress)).await;
        Ok(())
    }

    async fn publish_status(&self, status: GenerationStatus, progress: Option<i32>) {
        self.events
            .publish(
                &self.room(),
                "generation:status",
                json!({
                    "generationId": self.generation_id,
                    "status": status,
                    "progress": progress,
                }),
            )
            .await;
    }

    /// Persist the block list and broadcast it.
    pub async fn set_blocks(&self, blocks: &[Block]) -> anyhow::Result<()> {
        self.store.set_blocks(self.generation_id, blocks).await?;
        self.publish_blocks(blocks).await;
        Ok(())
    }

    /// Broadcast a block list that was persisted through another write
    /// (e.g. together with the structure analysis).
    pub async fn publish_blocks(&self, blocks: &[Block]) {
        self.events
            .publish(
                &self.room(),
                "generation:blocks",
                json!({
                    "generationId": self.generation_id,
                    "blocks": blocks,
                }),
            )
            .await;
    }

    /// Persist one SERP entry as it arrives.
    pub async fn push_serp_result(&self, entry: &SerpEntry) -> anyhow::Result<()> {
        self.store
            .push_serp_result(self.generation_id, entry)
            .await?;
        Ok(())
    }

    /// Broadcast terminal completion.
    pub async fn publish_completed(&self, article: &str, seo_title: &str, seo_description: &str) {
        self.events
            .publish(
                &self.room(),
                "generation:completed",
                json!({
                    "generationId": self.generation_id,
                    "article": article,
                    "seoTitle": seo_title,
                    "seoDescription": seo_description,
                }),
            )
            .await;
    }

    /// Broadcast terminal failure.
    pub async fn publish_error(&self, error: &str) {
        self.events
            .publish(
                &self.room(),
                "generation:error",
                json!({
                    "generationId": self.generation_id,
                    "error": error,
                }),
            )
            .await;
    }
}

//! Durable store adapter for generation records.
//!
//! Log appends and status updates are independent writes: a crash between
//! them leaves the record readable (stale progress at worst, never a
//! malformed log). Artifact sub-trees are written with targeted updates so
//! concurrent readers always see a consistent snapshot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    Block, Generation, GenerationStatus, LogEntry, SerpEntry, StructureAnalysis,
};

/// Store operations used by the HTTP surface and the stage runner.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert(&self, generation: &Generation) -> Result<()>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Generation>>;

    /// Fetch scoped to an owner. Missing and foreign records are
    /// indistinguishable.
    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Generation>>;

    async fn list_for_project(&self, project_id: Uuid, user_id: Uuid) -> Result<Vec<Generation>>;

    async fn list_for_owner(
        &self,
        user_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Generation>>;

    /// Atomic append to the log array.
    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<()>;

    /// Atomic status/progress/current-step update.
    async fn set_status(
        &self,
        id: Uuid,
        status: GenerationStatus,
        progress: Option<i32>,
        current_step: Option<&str>,
    ) -> Result<()>;

    /// Append one SERP entry as it arrives.
    async fn push_serp_result(&self, id: Uuid, entry: &SerpEntry) -> Result<()>;

    async fn set_structure(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
        blocks: &[Block],
    ) -> Result<()>;

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> Result<()>;

    async fn set_article(&self, id: Uuid, article: &str) -> Result<()>;

    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> Result<()>;

    async fn set_error(&self, id: Uuid, error: &str) -> Result<()>;

    async fn mark_started(&self, id: Uuid) -> Result<()>;

    async fn mark_completed(&self, id: Uuid) -> Result<()>;

    /// Delete scoped to an owner; true when a row was removed.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

pub struct PostgresGenerationStore {
    pool: PgPool,
}

impl PostgresGenerationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const GENERATION_COLUMNS: &str = "id, project_id, user_id, main_keyword, article_type, keywords, \
     language, region, lsi_keywords, style_comment, continuous, internal_links, \
     status, progress, current_step, logs, serp_results, structure_analysis, \
     article_blocks, article, seo_title, seo_description, error, \
     created_at, started_at, completed_at";

fn row_to_generation(row: &PgRow) -> Result<Generation> {
    let status: String = row.try_get("status")?;
    let status = GenerationStatus::parse(&status)
        .with_context(|| format!("unknown generation status {status:?}"))?;

    Ok(Generation {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        user_id: row.try_get("user_id")?,
        main_keyword: row.try_get("main_keyword")?,
        article_type: serde_json::from_value(row.try_get("article_type")?)?,
        keywords: serde_json::from_value(row.try_get("keywords")?)?,
        language: row.try_get("language")?,
        region: row.try_get("region")?,
        lsi_keywords: serde_json::from_value(row.try_get("lsi_keywords")?)?,
        style_comment: row.try_get("style_comment")?,
        continuous: row.try_get("continuous")?,
        internal_links: serde_json::from_value(row.try_get("internal_links")?)?,
        status,
        progress: row.try_get("progress")?,
        current_step: row.try_get("current_step")?,
        logs: serde_json::from_value(row.try_get("logs")?)?,
        serp_results: serde_json::from_value(row.try_get("serp_results")?)?,
        structure_analysis: row
            .try_get::<Option<serde_json::Value>, _>("structure_analysis")?
            .map(serde_json::from_value)
            .transpose()?,
        article_blocks: serde_json::from_value(row.try_get("article_blocks")?)?,
        article: row.try_get("article")?,
        seo_title: row.try_get("seo_title")?,
        seo_description: row.try_get("seo_description")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl GenerationStore for PostgresGenerationStore {
    async fn insert(&self, generation: &Generation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generations (
                id, project_id, user_id, main_keyword, article_type, keywords,
                language, region, lsi_keywords, style_comment, continuous,
                internal_links, status, progress, current_step, logs,
                serp_results, article_blocks, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(generation.id)
        .bind(generation.project_id)
        .bind(generation.user_id)
        .bind(&generation.main_keyword)
        .bind(serde_json::to_value(generation.article_type)?)
        .bind(serde_json::to_value(&generation.keywords)?)
        .bind(&generation.language)
        .bind(&generation.region)
        .bind(serde_json::to_value(&generation.lsi_keywords)?)
        .bind(&generation.style_comment)
        .bind(generation.continuous)
        .bind(serde_json::to_value(&generation.internal_links)?)
        .bind(generation.status.as_str())
        .bind(generation.progress)
        .bind(&generation.current_step)
        .bind(serde_json::to_value(&generation.logs)?)
        .bind(serde_json::to_value(&generation.serp_results)?)
        .bind(serde_json::to_value(&generation.article_blocks)?)
        .bind(generation.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Generation>> {
        let row = sqlx::query(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_generation).transpose()
    }

    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Generation>> {
        let row = sqlx::query(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generations WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_generation).transpose()
    }

    async fn list_for_project(&self, project_id: Uuid, user_id: Uuid) -> Result<Vec<Generation>> {
        let rows = sqlx::query(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generations \
             WHERE project_id = $1 AND user_id = $2 ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_generation).collect()
    }

    async fn list_for_owner(
        &self,
        user_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Generation>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {GENERATION_COLUMNS} FROM generations \
                     WHERE user_id = $1 AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                ))
                .bind(user_id)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {GENERATION_COLUMNS} FROM generations \
                     WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_generation).collect()
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<()> {
        sqlx::query("UPDATE generations SET logs = logs || $1::jsonb WHERE id = $2")
            .bind(serde_json::to_value(vec![entry])?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: GenerationStatus,
        progress: Option<i32>,
        current_step: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE generations
            SET status = $1,
                progress = COALESCE($2, progress),
                current_step = COALESCE($3, current_step)
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(progress)
        .bind(current_step)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_serp_result(&self, id: Uuid, entry: &SerpEntry) -> Result<()> {
        sqlx::query("UPDATE generations SET serp_results = serp_results || $1::jsonb WHERE id = $2")
            .bind(serde_json::to_value(vec![entry])?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_structure(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
        blocks: &[Block],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET structure_analysis = $1, article_blocks = $2 WHERE id = $3",
        )
        .bind(serde_json::to_value(analysis)?)
        .bind(serde_json::to_value(blocks)?)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> Result<()> {
        sqlx::query("UPDATE generations SET article_blocks = $1 WHERE id = $2")
            .bind(serde_json::to_value(blocks)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_article(&self, id: Uuid, article: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET article = $1 WHERE id = $2")
            .bind(article)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET seo_title = $1, seo_description = $2 WHERE id = $3")
            .bind(title)
            .bind(description)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_error(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET error = $1 WHERE id = $2")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_started(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET started_at = COALESCE(started_at, NOW()) WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE generations SET completed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM generations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// In-memory implementation (tests)
// =============================================================================

/// Store backed by a map, for pipeline and route tests.
#[derive(Default)]
pub struct MemoryGenerationStore {
    records: RwLock<HashMap<Uuid, Generation>>,
}

impl MemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Generation),
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .with_context(|| format!("generation {id} not found"))?;
        mutate(record);
        Ok(())
    }
}

#[async_trait]
impl GenerationStore for MemoryGenerationStore {
    async fn insert(&self, generation: &Generation) -> Result<()> {
        self.records
            .write()
            .await
            .insert(generation.id, generation.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Generation>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Generation>> {
        Ok(self
            .records
            .read()
            .await
            .get(&id)
            .filter(|g| g.user_id == user_id)
            .cloned())
    }

    async fn list_for_project(&self, project_id: Uuid, user_id: Uuid) -> Result<Vec<Generation>> {
        let mut list: Vec<Generation> = self
            .records
            .read()
            .await
            .values()
            .filter(|g| g.project_id == project_id && g.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn list_for_owner(
        &self,
        user_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Generation>> {
        let mut list: Vec<Generation> = self
            .records
            .read()
            .await
            .values()
            .filter(|g| g.user_id == user_id)
            .filter(|g| status.map(|s| g.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn append_log(&self, id: Uuid, entry: LogEntry) -> Result<()> {
        self.update(id, |g| g.logs.push(entry)).await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: GenerationStatus,
        progress: Option<i32>,
        current_step: Option<&str>,
    ) -> Result<()> {
        let current_step = current_step.map(str::to_string);
        self.update(id, |g| {
            g.status = status;
            if let Some(progress) = progress {
                g.progress = progress;
            }
            if let Some(step) = current_step {
                g.current_step = Some(step);
            }
        })
        .await
    }

    async fn push_serp_result(&self, id: Uuid, entry: &SerpEntry) -> Result<()> {
        let entry = entry.clone();
        self.update(id, |g| g.serp_results.push(entry)).await
    }

    async fn set_structure(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
        blocks: &[Block],
    ) -> Result<()> {
        let analysis = analysis.clone();
        let blocks = blocks.to_vec();
        self.update(id, |g| {
            g.structure_analysis = Some(analysis);
            g.article_blocks = blocks;
        })
        .await
    }

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> Result<()> {
        let blocks = blocks.to_vec();
        self.update(id, |g| g.article_blocks = blocks).await
    }

    async fn set_article(&self, id: Uuid, article: &str) -> Result<()> {
        let article = article.to_string();
        self.update(id, |g| g.article = Some(article)).await
    }

    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> Result<()> {
        let title = title.to_string();
        let description = description.to_string();
        self.update(id, |g| {
            g.seo_title = Some(title);
            g.seo_description = Some(description);
        })
        .await
    }

    async fn set_error(&self, id: Uuid, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update(id, |g| g.error = Some(error)).await
    }

    async fn mark_started(&self, id: Uuid) -> Result<()> {
        self.update(id, |g| {
            if g.started_at.is_none() {
                g.started_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        self.update(id, |g| g.completed_at = Some(Utc::now())).await
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(g) if g.user_id == user_id => {
                records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::generations::models::{ArticleType, LogLevel};

    fn sample() -> Generation {
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

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryGenerationStore::new();
        let generation = sample();
        store.insert(&generation).await.unwrap();

        let fetched = store.fetch(generation.id).await.unwrap().unwrap();
        assert_eq!(fetched.main_keyword, "best coffee makers 2024");
        assert_eq!(fetched.status, GenerationStatus::Queued);
    }

    #[tokio::test]
    async fn ownership_scoping() {
        let store = MemoryGenerationStore::new();
        let generation = sample();
        store.insert(&generation).await.unwrap();

        let other_user = Uuid::new_v4();
        assert!(store
            .find_for_owner(generation.id, other_user)
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete(generation.id, other_user).await.unwrap());
        assert!(store
            .delete(generation.id, generation.user_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn log_append_is_ordered() {
        let store = MemoryGenerationStore::new();
        let generation = sample();
        store.insert(&generation).await.unwrap();

        for i in 0..5 {
            store
                .append_log(generation.id, LogEntry::new(LogLevel::Info, format!("m{i}")))
                .await
                .unwrap();
        }

        let fetched = store.fetch(generation.id).await.unwrap().unwrap();
        let messages: Vec<&str> = fetched.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn status_update_keeps_progress_when_absent() {
        let store = MemoryGenerationStore::new();
        let generation = sample();
        store.insert(&generation).await.unwrap();

        store
            .set_status(generation.id, GenerationStatus::ParsingSerp, Some(10), None)
            .await
            .unwrap();
        store
            .set_status(generation.id, GenerationStatus::PausedAfterSerp, None, None)
            .await
            .unwrap();

        let fetched = store.fetch(generation.id).await.unwrap().unwrap();
        assert_eq!(fetched.progress, 10);
        assert_eq!(fetched.status, GenerationStatus::PausedAfterSerp);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = MemoryGenerationStore::new();
        let mut a = sample();
        let user_id = a.user_id;
        a.status = GenerationStatus::Completed;
        let mut b = sample();
        b.user_id = user_id;
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let completed = store
            .list_for_owner(user_id, Some(GenerationStatus::Completed), 50, 0)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let all = store.list_for_owner(user_id, None, 50, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}

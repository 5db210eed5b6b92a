//! Project persistence. Deleting a project cascade-deletes its generations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::Project;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<()>;
    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Project>>;
    async fn list_for_owner(&self, user_id: Uuid) -> Result<Vec<Project>>;
    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool>;
    /// Delete the project and all its generations; true when removed.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

pub struct PostgresProjectStore {
    pool: PgPool,
}

impl PostgresProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_project(row: &PgRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ProjectStore for PostgresProjectStore {
    async fn insert(&self, project: &Project) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, user_id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project.id)
        .bind(project.user_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, description, created_at, updated_at \
             FROM projects WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_project).transpose()
    }

    async fn list_for_owner(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, description, created_at, updated_at \
             FROM projects WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_project).collect()
    }

    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE projects SET name = $1, description = $2, updated_at = NOW() \
             WHERE id = $3 AND user_id = $4",
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        // Generations go first; the FK also cascades, this keeps the
        // intent explicit.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM generations WHERE project_id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Map-backed store for tests.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<Uuid, Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn insert(&self, project: &Project) -> Result<()> {
        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        Ok(())
    }

    async fn find_for_owner(&self, id: Uuid, user_id: Uuid) -> Result<Option<Project>> {
        Ok(self
            .projects
            .read()
            .await
            .get(&id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn list_for_owner(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let mut list: Vec<Project> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool> {
        let mut projects = self.projects.write().await;
        let Some(project) = projects.get_mut(&id).filter(|p| p.user_id == user_id) else {
            return Ok(false);
        };
        project.name = name.to_string();
        project.description = description.map(str::to_string);
        project.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut projects = self.projects.write().await;
        match projects.get(&id) {
            Some(p) if p.user_id == user_id => {
                projects.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

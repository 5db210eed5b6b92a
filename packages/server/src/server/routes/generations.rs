//! Generation endpoints: creation, inspection, continuation, queue stats.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::common::{ApiError, ApiResult, Envelope};
use crate::domains::generations::models::{ArticleType, Generation, GenerationStatus, InternalLink};
use crate::domains::generations::GenerationStore;
use crate::domains::projects::ProjectStore;
use crate::kernel::jobs::JobQueue;
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationRequest {
    pub main_keyword: String,
    pub article_type: ArticleType,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub lsi_keywords: Vec<String>,
    pub style_comment: Option<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub internal_links: Vec<InternalLink>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_region() -> String {
    "us".to_string()
}

/// POST /api/projects/{pid}/generations — create and enqueue a job.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateGenerationRequest>,
) -> ApiResult<axum::response::Response> {
    if body.main_keyword.trim().is_empty() {
        return Err(ApiError::BadRequest("Main keyword is required".into()));
    }
    if body.internal_links.iter().any(|l| l.url.trim().is_empty()) {
        return Err(ApiError::BadRequest("Internal link URLs must not be empty".into()));
    }

    // Project must exist and belong to the caller.
    state
        .projects
        .find_for_owner(project_id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let generation = Generation::new(
        project_id,
        auth.user_id,
        body.main_keyword.trim().to_string(),
        body.article_type,
        body.keywords,
        body.language,
        body.region,
        body.lsi_keywords,
        body.style_comment,
        body.continuous,
        body.internal_links,
    );

    state.generations.insert(&generation).await?;
    state
        .queue
        .enqueue(generation.id, auth.user_id, None)
        .await?;

    Ok((StatusCode::CREATED, Json(Envelope::ok(generation))).into_response())
}

/// GET /api/projects/{pid}/generations
pub async fn list_for_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    state
        .projects
        .find_for_owner(project_id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let generations = state
        .generations
        .list_for_project(project_id, auth.user_id)
        .await?;
    Ok(Json(Envelope::ok(generations)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/generations — all of the owner's jobs, filterable and paginated.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Envelope>> {
    let status = match &query.status {
        Some(raw) => Some(
            GenerationStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status {raw:?}")))?,
        ),
        None => None,
    };

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let generations = state
        .generations
        .list_for_owner(auth.user_id, status, limit, offset)
        .await?;

    Ok(Json(Envelope::ok(json!({
        "generations": generations,
        "page": page,
        "limit": limit,
    }))))
}

/// GET /api/generations/{id}
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    let generation = state
        .generations
        .find_for_owner(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(Envelope::ok(generation)))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<DateTime<Utc>>,
}

/// GET /api/generations/{id}/logs?since=<iso> — incremental log slice.
pub async fn logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Envelope>> {
    let generation = state
        .generations
        .find_for_owner(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let logs: Vec<_> = match query.since {
        Some(since) => generation
            .logs
            .into_iter()
            .filter(|entry| entry.at > since)
            .collect(),
        None => generation.logs,
    };

    Ok(Json(Envelope::ok(json!({
        "status": generation.status,
        "progress": generation.progress,
        "logs": logs,
    }))))
}

/// POST /api/generations/{id}/continue — resume from a pause point.
pub async fn resume(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    let generation = state
        .generations
        .find_for_owner(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !generation.status.is_paused() {
        return Err(ApiError::BadRequest(format!(
            "Generation is {}, not paused",
            generation.status.as_str()
        )));
    }

    state
        .queue
        .enqueue(generation.id, auth.user_id, Some(generation.status))
        .await?;

    Ok(Json(Envelope::message("Generation resumed")))
}

/// DELETE /api/generations/{id}
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    if !state.generations.delete(id, auth.user_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(Envelope::message("Generation deleted")))
}

/// GET /api/generations/queue/stats
pub async fn queue_stats(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let stats = state.queue.stats().await?;
    Ok(Json(Envelope::ok(stats)))
}

//! Project CRUD, owner-scoped.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::common::{ApiError, ApiResult, Envelope};
use crate::domains::projects::models::Project;
use crate::domains::projects::ProjectStore;
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Debug, Deserialize)]
pub struct ProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

/// POST /api/projects
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<ProjectRequest>,
) -> ApiResult<axum::response::Response> {
    Project::validate(&body.name, body.description.as_deref()).map_err(ApiError::BadRequest)?;

    let project = Project::new(auth.user_id, body.name.trim().to_string(), body.description);
    state.projects.insert(&project).await?;

    Ok((StatusCode::CREATED, Json(Envelope::ok(project))).into_response())
}

/// GET /api/projects
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let projects = state.projects.list_for_owner(auth.user_id).await?;
    Ok(Json(Envelope::ok(projects)))
}

/// GET /api/projects/{id}
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    let project = state
        .projects
        .find_for_owner(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(Envelope::ok(project)))
}

/// PUT /api/projects/{id}
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProjectRequest>,
) -> ApiResult<Json<Envelope>> {
    Project::validate(&body.name, body.description.as_deref()).map_err(ApiError::BadRequest)?;

    let updated = state
        .projects
        .update(id, auth.user_id, body.name.trim(), body.description.as_deref())
        .await?;
    if !updated {
        return Err(ApiError::NotFound);
    }

    let project = state
        .projects
        .find_for_owner(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(Envelope::ok(project)))
}

/// DELETE /api/projects/{id} — cascades to the project's generations.
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Envelope>> {
    if !state.projects.delete(id, auth.user_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(Envelope::message("Project deleted")))
}

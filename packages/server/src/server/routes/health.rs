//! Liveness and metrics endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: String,
    uptime_seconds: u64,
}

/// GET /api/health — liveness plus store connection state.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "ok",
            Err(_) => "error",
        },
        None => "not_configured",
    };

    let healthy = database != "error";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: database.to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
        }),
    )
}

/// GET /api/metrics — Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        )
            .into_response(),
    }
}

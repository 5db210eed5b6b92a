//! API error taxonomy.
//!
//! Handlers return `Result<_, ApiError>`; the `IntoResponse` impl converts
//! every variant into the response envelope with the matching HTTP status.
//! Ownership misses map to `NotFound` so callers cannot distinguish another
//! principal's resources from missing ones.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use super::envelope::Envelope;

/// Errors surfaced by the HTTP layer.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the server log; clients get a generic
        // message.
        let public_message = match &self {
            ApiError::Database(e) => {
                error!(error = %e, "database error");
                "Internal server error".to_string()
            }
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
            other => {
                if status.is_client_error() {
                    warn!(status = %status, error = %other, "request rejected");
                }
                other.to_string()
            }
        };

        (status, Json(Envelope::error(public_message))).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

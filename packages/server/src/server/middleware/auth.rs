//! Bearer-token authentication middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use uuid::Uuid;

use crate::common::ApiError;
use crate::domains::auth::TokenService;

/// Authenticated principal attached to request extensions.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

/// Reject requests without a valid bearer token; otherwise attach
/// `AuthUser` for handlers.
pub async fn require_auth(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    match extract_auth_user(&request, &tokens) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => ApiError::Unauthorized.into_response(),
    }
}

/// Extract and verify the bearer token from a request.
pub fn extract_auth_user(request: &Request, tokens: &TokenService) -> Option<AuthUser> {
    let auth_header = request.headers().get("authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    // Accept both "Bearer <token>" and a raw token.
    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str);

    let claims = tokens.verify_token(token).ok()?;
    Some(AuthUser {
        user_id: claims.user_id,
        email: claims.email,
    })
}

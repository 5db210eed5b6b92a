//! Authentication endpoints: login, identity, token refresh, password and
//! PIN management.

use axum::extract::{Extension, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::{ApiError, ApiResult, Envelope};
use crate::domains::auth::{CredentialKind, UserStore};
use crate::kernel::vault;
use crate::server::app::AppState;
use crate::server::middleware::AuthUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/login — exchange email+password for a signed token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<Envelope>> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }

    let user = state.users.find_by_email(body.email.trim()).await?;

    // Same failure for unknown email and wrong password.
    let Some(user) = user else {
        return Err(ApiError::Unauthorized);
    };
    if !vault::verify_secret(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized);
    }

    let token = state.tokens.create_token(user.id, &user.email)?;

    Ok(Json(Envelope::ok(json!({
        "token": token,
        "user": { "id": user.id, "email": user.email },
    }))))
}

/// GET /api/auth/me — principal plus credential status.
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let credentials: serde_json::Map<String, serde_json::Value> = CredentialKind::ALL
        .iter()
        .map(|kind| {
            let stored = user.credential(*kind);
            (
                kind.as_str().to_string(),
                json!({
                    "configured": stored.encrypted.is_some(),
                    "isValid": stored.is_valid,
                    "lastChecked": stored.last_validated_at,
                }),
            )
        })
        .collect();

    Ok(Json(Envelope::ok(json!({
        "id": user.id,
        "email": user.email,
        "hasPinConfigured": user.has_pin(),
        "apiKeys": credentials,
    }))))
}

/// POST /api/auth/refresh — mint a fresh token for the current principal.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let token = state.tokens.create_token(auth.user_id, &auth.email)?;
    Ok(Json(Envelope::ok(json!({ "token": token }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// PUT /api/auth/password — rotate the password.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Envelope>> {
    if body.new_password.chars().count() < 8 {
        return Err(ApiError::BadRequest(
            "New password must be at least 8 characters".into(),
        ));
    }

    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !vault::verify_secret(&body.current_password, &user.password_hash) {
        return Err(ApiError::Forbidden("Current password is incorrect".into()));
    }

    let hash = vault::hash_secret(&body.new_password)?;
    state.users.update_password(user.id, &hash).await?;

    Ok(Json(Envelope::message("Password updated")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePinRequest {
    pub new_pin: String,
    pub current_pin: Option<String>,
    pub password: Option<String>,
}

/// PUT /api/auth/pin — set or rotate the PIN. Requires the current PIN if
/// one is configured, otherwise the password.
pub async fn change_pin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<ChangePinRequest>,
) -> ApiResult<Json<Envelope>> {
    let pin = body.new_pin.trim();
    if pin.len() < 4 || pin.len() > 8 || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::BadRequest("PIN must be 4-8 digits".into()));
    }

    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    match &user.pin_hash {
        Some(existing) => {
            let current = body
                .current_pin
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("Current PIN is required".into()))?;
            if !vault::verify_secret(current, existing) {
                return Err(ApiError::Forbidden("Current PIN is incorrect".into()));
            }
        }
        None => {
            let password = body
                .password
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("Password is required to set a PIN".into()))?;
            if !vault::verify_secret(password, &user.password_hash) {
                return Err(ApiError::Forbidden("Password is incorrect".into()));
            }
        }
    }

    let hash = vault::hash_secret(pin)?;
    state.users.update_pin(user.id, &hash).await?;

    Ok(Json(Envelope::message("PIN updated")))
}

/// GET /api/auth/pin-status
pub async fn pin_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(Envelope::ok(json!({
        "hasPinConfigured": user.has_pin(),
    }))))
}

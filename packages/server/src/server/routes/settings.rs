//! Credential management endpoints: masked views, PIN verification, key
//! storage and provider validation pings.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::common::{ApiError, ApiResult, Envelope};
use crate::domains::auth::{CredentialKind, PinOutcome, User, UserStore};
use crate::kernel::vault;
use crate::server::app::AppState;
use crate::server::middleware::{AuthUser, ClientIp};

fn parse_provider(provider: &str) -> ApiResult<CredentialKind> {
    CredentialKind::parse(provider)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown provider {provider:?}")))
}

/// GET /api/settings/api-keys (and /masked) — masked key view per provider.
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Envelope>> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut keys = serde_json::Map::new();
    for kind in CredentialKind::ALL {
        let stored = user.credential(kind);
        let masked = stored
            .encrypted
            .as_deref()
            .and_then(|sealed| state.cipher.decrypt(sealed).ok())
            .map(|plain| vault::mask_credential(&plain));

        keys.insert(
            kind.as_str().to_string(),
            json!({
                "configured": stored.encrypted.is_some(),
                "maskedKey": masked,
                "isValid": stored.is_valid,
                "lastChecked": stored.last_validated_at,
            }),
        );
    }

    Ok(Json(Envelope::ok(json!({ "apiKeys": keys }))))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPinRequest {
    pub pin: String,
}

/// POST /api/settings/api-keys/verify-pin
///
/// 200 on success; 403 with `isBlocked`/`attemptsRemaining` otherwise.
pub async fn verify_pin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ip): Extension<ClientIp>,
    Json(body): Json<VerifyPinRequest>,
) -> ApiResult<axum::response::Response> {
    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let outcome = check_pin(&state, &user, &ip, &body.pin).await?;

    let response = match outcome {
        PinOutcome::Verified => (
            StatusCode::OK,
            Json(Envelope::message("PIN verified").blocked(false)),
        ),
        PinOutcome::Invalid { attempts_remaining } => (
            StatusCode::FORBIDDEN,
            Json(
                Envelope::error("Invalid PIN")
                    .blocked(false)
                    .attempts_remaining(attempts_remaining),
            ),
        ),
        PinOutcome::Blocked => (
            StatusCode::FORBIDDEN,
            Json(
                Envelope::error("Too many failed attempts, PIN verification blocked")
                    .blocked(true)
                    .attempts_remaining(0),
            ),
        ),
    };

    Ok(response.into_response())
}

async fn check_pin(
    state: &AppState,
    user: &User,
    ip: &ClientIp,
    pin: &str,
) -> ApiResult<PinOutcome> {
    let Some(pin_hash) = &user.pin_hash else {
        return Err(ApiError::BadRequest("PIN is not configured".into()));
    };

    Ok(state
        .pin_guard
        .verify(&ip.to_key(), user.id, pin, pin_hash)
        .await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreKeyRequest {
    pub api_key: String,
    pub pin: Option<String>,
}

/// PUT /api/settings/api-keys/{provider} — encrypt and store a credential.
/// Requires a PIN check when one is configured.
pub async fn store_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ip): Extension<ClientIp>,
    Path(provider): Path<String>,
    Json(body): Json<StoreKeyRequest>,
) -> ApiResult<axum::response::Response> {
    let kind = parse_provider(&provider)?;

    if body.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest("API key must not be empty".into()));
    }

    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if user.has_pin() {
        let pin = body
            .pin
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("PIN is required".into()))?;
        match check_pin(&state, &user, &ip, pin).await? {
            PinOutcome::Verified => {}
            PinOutcome::Invalid { attempts_remaining } => {
                return Ok((
                    StatusCode::FORBIDDEN,
                    Json(
                        Envelope::error("Invalid PIN")
                            .blocked(false)
                            .attempts_remaining(attempts_remaining),
                    ),
                )
                    .into_response());
            }
            PinOutcome::Blocked => {
                return Ok((
                    StatusCode::FORBIDDEN,
                    Json(
                        Envelope::error("Too many failed attempts, PIN verification blocked")
                            .blocked(true)
                            .attempts_remaining(0),
                    ),
                )
                    .into_response());
            }
        }
    }

    let sealed = state.cipher.encrypt(body.api_key.trim())?;
    state.users.set_credential(user.id, kind, &sealed).await?;

    Ok(Json(Envelope::message(format!(
        "{} key stored",
        kind.as_str()
    )))
    .into_response())
}

/// POST /api/settings/api-keys/{provider}/test — ping the provider and
/// persist the verdict.
pub async fn test_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> ApiResult<Json<Envelope>> {
    let kind = parse_provider(&provider)?;

    let user = state
        .users
        .find_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let sealed = user
        .credential(kind)
        .encrypted
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest(format!("{} key is not configured", kind.as_str())))?;
    let plain = state.cipher.decrypt(sealed)?;

    let is_valid = match ping_provider(&state, kind, &plain).await {
        Ok(()) => true,
        Err(e) => {
            warn!(provider = kind.as_str(), error = %e, "credential test failed");
            false
        }
    };

    state
        .users
        .set_credential_validity(user.id, kind, is_valid)
        .await?;

    Ok(Json(Envelope::ok(json!({ "isValid": is_valid }))))
}

/// Cheap authenticated call against each provider.
async fn ping_provider(state: &AppState, kind: CredentialKind, key: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let response = match kind {
        CredentialKind::Openrouter => {
            client
                .get("https://openrouter.ai/api/v1/models")
                .bearer_auth(key)
                .send()
                .await?
        }
        CredentialKind::Firecrawl => {
            client
                .post("https://api.firecrawl.dev/v1/search")
                .bearer_auth(key)
                .json(&json!({ "query": "ping", "limit": 1 }))
                .send()
                .await?
        }
        CredentialKind::Supabase => {
            let base = state.config.supabase_url.trim_end_matches('/');
            client
                .get(format!("{base}/rest/v1/"))
                .header("apikey", key)
                .bearer_auth(key)
                .send()
                .await?
        }
    };

    if !response.status().is_success() {
        anyhow::bail!("provider returned {}", response.status());
    }
    Ok(())
}

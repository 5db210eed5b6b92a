//! Application setup and router assembly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
#[cfg(not(debug_assertions))]
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::auth::{PinGuard, TokenService, UserStore};
use crate::domains::generations::GenerationStore;
use crate::domains::projects::ProjectStore;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{CredentialCipher, RoomRegistry};
use crate::server::middleware::{auth::require_auth, client_ip, telemetry};
use crate::server::routes::{auth, generations, health, projects, settings, ws};

/// Request body cap.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub generations: Arc<dyn GenerationStore>,
    pub queue: Arc<dyn JobQueue>,
    pub tokens: Arc<TokenService>,
    pub cipher: CredentialCipher,
    pub pin_guard: PinGuard,
    pub registry: RoomRegistry,
    pub metrics: Option<PrometheusHandle>,
    /// Absent in tests running against in-memory stores.
    pub db_pool: Option<PgPool>,
    pub started_at: Instant,
}

/// Build the Axum application router.
pub fn build_app(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/health", get(health::health))
        .route("/api/metrics", get(health::metrics))
        .route("/ws", get(ws::websocket_handler));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/password", put(auth::change_password))
        .route("/api/auth/pin", put(auth::change_pin))
        .route("/api/auth/pin-status", get(auth::pin_status))
        .route("/api/settings/api-keys", get(settings::list_keys))
        .route("/api/settings/api-keys/masked", get(settings::list_keys))
        .route("/api/settings/api-keys/verify-pin", post(settings::verify_pin))
        .route("/api/settings/api-keys/{provider}", put(settings::store_key))
        .route("/api/settings/api-keys/{provider}/test", post(settings::test_key))
        .route("/api/projects", post(projects::create).get(projects::list))
        .route(
            "/api/projects/{id}",
            get(projects::get)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route(
            "/api/projects/{pid}/generations",
            post(generations::create).get(generations::list_for_project),
        )
        .route("/api/generations", get(generations::list))
        .route("/api/generations/queue/stats", get(generations::queue_stats))
        .route(
            "/api/generations/{id}",
            get(generations::get).delete(generations::delete),
        )
        .route("/api/generations/{id}/logs", get(generations::logs))
        .route("/api/generations/{id}/continue", post(generations::resume))
        .route_layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            require_auth,
        ));

    let router = public
        .merge(protected)
        .layer(middleware::from_fn(telemetry::track_requests))
        .layer(middleware::from_fn(client_ip::layer(
            state.config.trust_proxy,
        )))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Global rate limit: 100 requests per 15 minutes per source IP
    // (one token every 9 seconds with a burst of 100).
    #[cfg(not(debug_assertions))]
    let router = router.layer(GovernorLayer {
        config: Arc::new(
            GovernorConfigBuilder::default()
                .per_second(9)
                .burst_size(100)
                .use_headers()
                .finish()
                .expect("rate limiter configuration is valid"),
        ),
    });

    router.with_state(state)
}

// API process: HTTP surface + subscription gateway.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use draftforge::domains::auth::models::StoredCredential;
use draftforge::domains::auth::{
    PinGuard, PostgresPinAttemptStore, PostgresUserStore, TokenService, User, UserStore,
};
use draftforge::domains::generations::PostgresGenerationStore;
use draftforge::domains::projects::PostgresProjectStore;
use draftforge::kernel::jobs::PostgresJobQueue;
use draftforge::kernel::{metrics, run_bus_relay, CredentialCipher, RoomRegistry};
use draftforge::server::{build_app, AppState};
use draftforge::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,draftforge=debug,sqlx=warn,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Draftforge API");

    let config = Config::from_env().context("Failed to load configuration")?;

    // Database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    // NATS
    tracing::info!(url = %config.nats_url, "Connecting to NATS...");
    let mut nats_options = async_nats::ConnectOptions::new();
    if let (Some(user), Some(password)) = (&config.nats_user, &config.nats_password) {
        nats_options = nats_options.user_and_password(user.clone(), password.clone());
    }
    let nats_client = nats_options
        .connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;

    // Shared services
    let users = Arc::new(PostgresUserStore::new(pool.clone()));
    bootstrap_admin(&config, users.as_ref()).await?;

    let cipher = CredentialCipher::new(config.encryption_key.as_deref(), &config.jwt_secret)?;
    let tokens = Arc::new(TokenService::new(
        &config.jwt_secret,
        config.jwt_expires_days,
    ));
    let pin_attempts = Arc::new(PostgresPinAttemptStore::new(pool.clone()));
    let registry = RoomRegistry::new();

    // One long-lived bus subscriber per API process.
    let shutdown = CancellationToken::new();
    {
        let relay_client = nats_client.clone();
        let relay_registry = registry.clone();
        let relay_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_bus_relay(relay_client, relay_registry, relay_shutdown).await {
                tracing::error!(error = %e, "bus relay exited");
            }
        });
    }

    let state = AppState {
        users,
        projects: Arc::new(PostgresProjectStore::new(pool.clone())),
        generations: Arc::new(PostgresGenerationStore::new(pool.clone())),
        queue: Arc::new(PostgresJobQueue::new(pool.clone())),
        tokens,
        cipher,
        pin_guard: PinGuard::new(pin_attempts),
        registry,
        metrics: metrics::install(),
        db_pool: Some(pool),
        started_at: Instant::now(),
        config: config.clone(),
    };

    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_signal().await;
        serve_shutdown.cancel();
    })
    .await
    .context("Server error")?;

    Ok(())
}

/// Create the bootstrap principal on first start.
async fn bootstrap_admin(config: &draftforge::Config, users: &dyn UserStore) -> Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    if users.find_by_email(email).await?.is_some() {
        return Ok(());
    }

    let user = User {
        id: uuid::Uuid::new_v4(),
        email: email.clone(),
        password_hash: draftforge::kernel::vault::hash_secret(password)?,
        pin_hash: None,
        openrouter: StoredCredential::default(),
        supabase: StoredCredential::default(),
        firecrawl: StoredCredential::default(),
        created_at: chrono::Utc::now(),
    };
    users.insert(&user).await?;
    tracing::info!(email = %email, "bootstrap principal created");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received");
}

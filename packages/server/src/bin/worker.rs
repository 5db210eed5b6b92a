// Worker process: queue consumer + stage runner.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use draftforge::domains::auth::PostgresUserStore;
use draftforge::domains::generations::{PostgresGenerationStore, StageRunner};
use draftforge::kernel::jobs::{GenerationWorker, PostgresJobQueue, WorkerConfig};
use draftforge::kernel::{
    CredentialCipher, EventBus, NatsClientPublisher, ProductionProviders, ProviderSettings,
};
use draftforge::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,draftforge=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Draftforge worker");

    let config = Config::from_env().context("Failed to load configuration")?;

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

    tracing::info!(url = %config.nats_url, "Connecting to NATS...");
    let mut nats_options = async_nats::ConnectOptions::new();
    if let (Some(user), Some(password)) = (&config.nats_user, &config.nats_password) {
        nats_options = nats_options.user_and_password(user.clone(), password.clone());
    }
    let nats_client = nats_options
        .connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;

    let events = EventBus::new(Arc::new(NatsClientPublisher::new(nats_client)));
    let cipher = CredentialCipher::new(config.encryption_key.as_deref(), &config.jwt_secret)?;

    let providers = Arc::new(ProductionProviders::new(ProviderSettings {
        openrouter_model: config.openrouter_model.clone(),
        embeddings_url: config.embeddings_url.clone(),
        embeddings_model: config.embeddings_model.clone(),
        supabase_url: config.supabase_url.clone(),
    }));

    let store = Arc::new(PostgresGenerationStore::new(pool.clone()));
    let runner = Arc::new(StageRunner::new(store, events, providers));

    let worker = Arc::new(GenerationWorker::new(
        Arc::new(PostgresJobQueue::new(pool.clone())),
        runner,
        Arc::new(PostgresUserStore::new(pool)),
        cipher,
        WorkerConfig {
            concurrency: config.worker_concurrency,
            max_cluster: config.max_concurrent_generations,
            ..Default::default()
        },
    ));

    // Graceful shutdown: stop intake, drain in-flight stages.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.cancel();
        });
    }

    worker.run(shutdown).await
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

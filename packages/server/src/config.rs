use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub nats_url: String,
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,
    pub jwt_secret: String,
    pub jwt_expires_days: i64,
    /// Optional 32-byte raw encryption key, hex-encoded. When absent the
    /// vault derives a key from `jwt_secret`.
    pub encryption_key: Option<String>,
    pub max_concurrent_generations: usize,
    pub worker_concurrency: usize,
    pub trust_proxy: bool,
    pub openrouter_model: String,
    pub embeddings_url: String,
    pub embeddings_model: String,
    pub supabase_url: String,
    /// Bootstrap principal, created on first start when both are set.
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters");
        }

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            nats_user: env::var("NATS_USER").ok(),
            nats_password: env::var("NATS_PASSWORD").ok(),
            jwt_secret,
            jwt_expires_days: env::var("JWT_EXPIRES_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .context("JWT_EXPIRES_DAYS must be a valid number")?,
            encryption_key: env::var("ENCRYPTION_KEY").ok().filter(|s| !s.is_empty()),
            max_concurrent_generations: env::var("MAX_CONCURRENT_GENERATIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_CONCURRENT_GENERATIONS must be a valid number")?,
            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("WORKER_CONCURRENCY must be a valid number")?,
            trust_proxy: env::var("TRUST_PROXY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            openrouter_model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4o".to_string()),
            embeddings_url: env::var("EMBEDDINGS_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1/embeddings".to_string()),
            embeddings_model: env::var("EMBEDDINGS_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            supabase_url: env::var("SUPABASE_URL").unwrap_or_default(),
            admin_email: env::var("ADMIN_EMAIL").ok().filter(|s| !s.is_empty()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|s| !s.is_empty()),
        })
    }
}

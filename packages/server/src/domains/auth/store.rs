//! User and PIN-attempt persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{CredentialKind, PinAttempt, StoredCredential, User};

/// Failures before a (IP, principal) pair is locked out.
pub const MAX_PIN_ATTEMPTS: i32 = 5;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn insert(&self, user: &User) -> Result<()>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;
    async fn update_pin(&self, id: Uuid, pin_hash: &str) -> Result<()>;
    async fn set_credential(&self, id: Uuid, kind: CredentialKind, encrypted: &str) -> Result<()>;
    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        is_valid: bool,
    ) -> Result<()>;
}

/// Attempt-counter operations. All mutations are store-level atomic
/// upserts, so concurrent failures never lose counts.
#[async_trait]
pub trait PinAttemptStore: Send + Sync {
    /// Record one failure; returns the updated record.
    async fn record_failure(&self, ip: &str, user_id: Uuid) -> Result<PinAttempt>;

    /// Current attempt record, if any.
    async fn get(&self, ip: &str, user_id: Uuid) -> Result<Option<PinAttempt>>;

    /// Clear the counter after a successful verification.
    async fn reset(&self, ip: &str, user_id: Uuid) -> Result<()>;
}

// =============================================================================
// Postgres implementations
// =============================================================================

pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &PgRow) -> Result<User> {
    let credential = |prefix: &str| -> Result<StoredCredential> {
        Ok(StoredCredential {
            encrypted: row.try_get(format!("{prefix}_key").as_str())?,
            is_valid: row.try_get(format!("{prefix}_valid").as_str())?,
            last_validated_at: row.try_get(format!("{prefix}_validated_at").as_str())?,
        })
    };

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        pin_hash: row.try_get("pin_hash")?,
        openrouter: credential("openrouter")?,
        supabase: credential("supabase")?,
        firecrawl: credential("firecrawl")?,
        created_at: row.try_get("created_at")?,
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, pin_hash, \
     openrouter_key, openrouter_valid, openrouter_validated_at, \
     supabase_key, supabase_valid, supabase_validated_at, \
     firecrawl_key, firecrawl_valid, firecrawl_validated_at, created_at";

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, pin_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.pin_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_pin(&self, id: Uuid, pin_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET pin_hash = $1 WHERE id = $2")
            .bind(pin_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_credential(&self, id: Uuid, kind: CredentialKind, encrypted: &str) -> Result<()> {
        // Column names come from a closed enum, never user input.
        let query = format!(
            "UPDATE users SET {kind}_key = $1, {kind}_valid = NULL, \
             {kind}_validated_at = NULL WHERE id = $2",
            kind = kind.as_str()
        );
        sqlx::query(&query)
            .bind(encrypted)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        is_valid: bool,
    ) -> Result<()> {
        let query = format!(
            "UPDATE users SET {kind}_valid = $1, {kind}_validated_at = NOW() WHERE id = $2",
            kind = kind.as_str()
        );
        sqlx::query(&query)
            .bind(is_valid)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresPinAttemptStore {
    pool: PgPool,
}

impl PostgresPinAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_attempt(row: &PgRow) -> Result<PinAttempt> {
    Ok(PinAttempt {
        ip: row.try_get("ip")?,
        user_id: row.try_get("user_id")?,
        attempts: row.try_get("attempts")?,
        blocked: row.try_get("blocked")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
    })
}

#[async_trait]
impl PinAttemptStore for PostgresPinAttemptStore {
    async fn record_failure(&self, ip: &str, user_id: Uuid) -> Result<PinAttempt> {
        let row = sqlx::query(
            r#"
            INSERT INTO pin_attempts (ip, user_id, attempts, blocked, last_attempt_at)
            VALUES ($1, $2, 1, false, NOW())
            ON CONFLICT (ip, user_id) DO UPDATE
            SET attempts = pin_attempts.attempts + 1,
                blocked = pin_attempts.attempts + 1 >= $3,
                last_attempt_at = NOW()
            RETURNING ip, user_id, attempts, blocked, last_attempt_at
            "#,
        )
        .bind(ip)
        .bind(user_id)
        .bind(MAX_PIN_ATTEMPTS)
        .fetch_one(&self.pool)
        .await?;

        row_to_attempt(&row)
    }

    async fn get(&self, ip: &str, user_id: Uuid) -> Result<Option<PinAttempt>> {
        let row = sqlx::query(
            "SELECT ip, user_id, attempts, blocked, last_attempt_at \
             FROM pin_attempts WHERE ip = $1 AND user_id = $2",
        )
        .bind(ip)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    async fn reset(&self, ip: &str, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pin_attempts WHERE ip = $1 AND user_id = $2")
            .bind(ip)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// In-memory implementations (tests)
// =============================================================================

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .with_context(|| format!("user {id} not found"))?;
        mutate(user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let hash = password_hash.to_string();
        self.update(id, |u| u.password_hash = hash).await
    }

    async fn update_pin(&self, id: Uuid, pin_hash: &str) -> Result<()> {
        let hash = pin_hash.to_string();
        self.update(id, |u| u.pin_hash = Some(hash)).await
    }

    async fn set_credential(&self, id: Uuid, kind: CredentialKind, encrypted: &str) -> Result<()> {
        let encrypted = encrypted.to_string();
        self.update(id, |u| {
            let slot = match kind {
                CredentialKind::Openrouter => &mut u.openrouter,
                CredentialKind::Supabase => &mut u.supabase,
                CredentialKind::Firecrawl => &mut u.firecrawl,
            };
            slot.encrypted = Some(encrypted);
            slot.is_valid = None;
            slot.last_validated_at = None;
        })
        .await
    }

    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        is_valid: bool,
    ) -> Result<()> {
        self.update(id, |u| {
            let slot = match kind {
                CredentialKind::Openrouter => &mut u.openrouter,
                CredentialKind::Supabase => &mut u.supabase,
                CredentialKind::Firecrawl => &mut u.firecrawl,
            };
            slot.is_valid = Some(is_valid);
            slot.last_validated_at = Some(Utc::now());
        })
        .await
    }
}

#[derive(Default)]
pub struct MemoryPinAttemptStore {
    attempts: RwLock<HashMap<(String, Uuid), PinAttempt>>,
}

impl MemoryPinAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PinAttemptStore for MemoryPinAttemptStore {
    async fn record_failure(&self, ip: &str, user_id: Uuid) -> Result<PinAttempt> {
        let mut attempts = self.attempts.write().await;
        let key = (ip.to_string(), user_id);
        let entry = attempts.entry(key).or_insert_with(|| PinAttempt {
            ip: ip.to_string(),
            user_id,
            attempts: 0,
            blocked: false,
            last_attempt_at: Utc::now(),
        });
        entry.attempts += 1;
        entry.blocked = entry.attempts >= MAX_PIN_ATTEMPTS;
        entry.last_attempt_at = Utc::now();
        Ok(entry.clone())
    }

    async fn get(&self, ip: &str, user_id: Uuid) -> Result<Option<PinAttempt>> {
        Ok(self
            .attempts
            .read()
            .await
            .get(&(ip.to_string(), user_id))
            .cloned())
    }

    async fn reset(&self, ip: &str, user_id: Uuid) -> Result<()> {
        self.attempts
            .write()
            .await
            .remove(&(ip.to_string(), user_id));
        Ok(())
    }
}

//! Postgres-backed job queue.
//!
//! A durable FIFO keyed by generation id. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so many workers can poll the same table, and a
//! lease + heartbeat makes stalled jobs (dead worker, abandoned in-flight
//! stage) eligible for re-dispatch once the lease expires.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{QueueJob, QueueJobStatus, QueueStats};
use crate::domains::generations::models::GenerationStatus;

/// Total attempts per enqueued invocation.
pub const MAX_ATTEMPTS: i32 = 3;

/// Base retry backoff; doubles per attempt.
pub const RETRY_BACKOFF_SECS: i64 = 5;

/// Finished-job retention.
pub const KEEP_COMPLETED: i64 = 100;
pub const KEEP_FAILED: i64 = 50;

/// Lease granted to a claim before the stall detector may re-dispatch.
pub const LEASE_MS: i64 = 60_000;

/// Queue operations shared by the API (enqueue, stats) and workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Place one invocation on the queue.
    async fn enqueue(
        &self,
        generation_id: Uuid,
        user_id: Uuid,
        continue_from: Option<GenerationStatus>,
    ) -> Result<Uuid>;

    /// Claim up to `limit` runnable jobs in insertion order, keeping the
    /// cluster-wide running count at or below `max_cluster`. Stalled jobs
    /// (expired lease) are claimable again.
    async fn claim(&self, worker_id: &str, limit: usize, max_cluster: usize)
        -> Result<Vec<QueueJob>>;

    /// Extend a running job's lease.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<()>;

    /// Record a failure. Re-queues with exponential backoff while attempts
    /// remain, otherwise the job fails for good.
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Drop finished jobs beyond the retention windows.
    async fn trim_finished(&self) -> Result<()>;
}

/// Backoff before retry `attempt` (1-based).
pub fn retry_backoff(attempt: i32) -> ChronoDuration {
    ChronoDuration::seconds(RETRY_BACKOFF_SECS << (attempt - 1).clamp(0, 10))
}

// =============================================================================
// Postgres implementation
// =============================================================================

pub struct PostgresJobQueue {
    pool: PgPool,
    lease_ms: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_ms: LEASE_MS,
        }
    }

    pub fn with_lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }
}

fn row_to_job(row: &PgRow) -> Result<QueueJob> {
    let status: String = row.try_get("status")?;
    let continue_from: Option<String> = row.try_get("continue_from")?;

    Ok(QueueJob {
        id: row.try_get("id")?,
        generation_id: row.try_get("generation_id")?,
        user_id: row.try_get("user_id")?,
        continue_from: continue_from.as_deref().and_then(GenerationStatus::parse),
        status: QueueJobStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown queue status {status:?}"))?,
        attempt: row.try_get("attempt")?,
        max_attempts: row.try_get("max_attempts")?,
        run_at: row.try_get("run_at")?,
        enqueued_at: row.try_get("enqueued_at")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        worker_id: row.try_get("worker_id")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        generation_id: Uuid,
        user_id: Uuid,
        continue_from: Option<GenerationStatus>,
    ) -> Result<Uuid> {
        let job = QueueJob::new(generation_id, user_id, continue_from, MAX_ATTEMPTS);

        sqlx::query(
            r#"
            INSERT INTO queue_jobs (
                id, generation_id, user_id, continue_from, status, attempt,
                max_attempts, run_at, enqueued_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.generation_id)
        .bind(job.user_id)
        .bind(job.continue_from.map(|s| s.as_str()))
        .bind(job.max_attempts)
        .bind(job.run_at)
        .bind(job.enqueued_at)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        max_cluster: usize,
    ) -> Result<Vec<QueueJob>> {
        // Cluster cap: live running jobs count against the limit; stalled
        // ones do not.
        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_jobs \
             WHERE status = 'running' AND lease_expires_at >= NOW()",
        )
        .fetch_one(&self.pool)
        .await?;

        let allowed = (max_cluster as i64 - running).min(limit as i64);
        if allowed <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM queue_jobs
                WHERE (status = 'pending' AND run_at <= NOW())
                   OR (status = 'running' AND lease_expires_at < NOW())
                ORDER BY enqueued_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs q
            SET status = 'running',
                worker_id = $1,
                attempt = q.attempt + 1,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::interval
            FROM claimable
            WHERE q.id = claimable.id
            RETURNING q.id, q.generation_id, q.user_id, q.continue_from, q.status,
                      q.attempt, q.max_attempts, q.run_at, q.enqueued_at,
                      q.lease_expires_at, q.worker_id, q.error
            "#,
        )
        .bind(worker_id)
        .bind(allowed)
        .bind(self.lease_ms.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut jobs: Vec<QueueJob> = rows.iter().map(row_to_job).collect::<Result<_>>()?;
        jobs.sort_by_key(|j| j.enqueued_at);
        Ok(jobs)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE queue_jobs \
             SET lease_expires_at = NOW() + ($1 || ' milliseconds')::interval \
             WHERE id = $2 AND status = 'running'",
        )
        .bind(self.lease_ms.to_string())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE queue_jobs SET status = 'completed', lease_expires_at = NULL WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let row = sqlx::query("SELECT attempt, max_attempts FROM queue_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(()) };
        let attempt: i32 = row.try_get("attempt")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;

        if attempt < max_attempts {
            let run_at = Utc::now() + retry_backoff(attempt);
            sqlx::query(
                "UPDATE queue_jobs \
                 SET status = 'pending', run_at = $1, error = $2, \
                     lease_expires_at = NULL, worker_id = NULL \
                 WHERE id = $3",
            )
            .bind(run_at)
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE queue_jobs \
                 SET status = 'failed', error = $1, lease_expires_at = NULL \
                 WHERE id = $2",
            )
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS waiting,
                COUNT(*) FILTER (WHERE status = 'running') AS active,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM queue_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            waiting: row.try_get("waiting")?,
            active: row.try_get("active")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
        })
    }

    async fn trim_finished(&self) -> Result<()> {
        for (status, keep) in [("completed", KEEP_COMPLETED), ("failed", KEEP_FAILED)] {
            sqlx::query(
                r#"
                DELETE FROM queue_jobs
                WHERE status = $1
                  AND id NOT IN (
                      SELECT id FROM queue_jobs
                      WHERE status = $1
                      ORDER BY enqueued_at DESC
                      LIMIT $2
                  )
                "#,
            )
            .bind(status)
            .bind(keep)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

// =============================================================================
// In-memory implementation (tests)
// =============================================================================

/// Queue with the same semantics over a vector, for worker tests.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<QueueJob>>,
    lease_ms: i64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            lease_ms: LEASE_MS,
        }
    }

    pub async fn job(&self, id: Uuid) -> Option<QueueJob> {
        self.jobs.lock().await.iter().find(|j| j.id == id).cloned()
    }

    pub async fn jobs_for_generation(&self, generation_id: Uuid) -> Vec<QueueJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|j| j.generation_id == generation_id)
            .cloned()
            .collect()
    }

    /// Collapse a pending job's backoff so tests don't wait it out.
    pub async fn make_runnable_now(&self, id: Uuid) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == QueueJobStatus::Pending)
        {
            job.run_at = Utc::now();
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        generation_id: Uuid,
        user_id: Uuid,
        continue_from: Option<GenerationStatus>,
    ) -> Result<Uuid> {
        let job = QueueJob::new(generation_id, user_id, continue_from, MAX_ATTEMPTS);
        let id = job.id;
        self.jobs.lock().await.push(job);
        Ok(id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        max_cluster: usize,
    ) -> Result<Vec<QueueJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let running = jobs
            .iter()
            .filter(|j| {
                j.status == QueueJobStatus::Running
                    && j.lease_expires_at.map(|l| l >= now).unwrap_or(false)
            })
            .count();
        let allowed = (max_cluster.saturating_sub(running)).min(limit);
        if allowed == 0 {
            return Ok(Vec::new());
        }

        let mut claimable: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| match j.status {
                QueueJobStatus::Pending => j.run_at <= now,
                QueueJobStatus::Running => {
                    j.lease_expires_at.map(|l| l < now).unwrap_or(true)
                }
                _ => false,
            })
            .map(|(i, _)| i)
            .collect();
        claimable.sort_by_key(|&i| jobs[i].enqueued_at);
        claimable.truncate(allowed);

        let mut claimed = Vec::with_capacity(claimable.len());
        for index in claimable {
            let job = &mut jobs[index];
            job.status = QueueJobStatus::Running;
            job.worker_id = Some(worker_id.to_string());
            job.attempt += 1;
            job.lease_expires_at = Some(now + ChronoDuration::milliseconds(self.lease_ms));
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == QueueJobStatus::Running)
        {
            job.lease_expires_at = Some(Utc::now() + ChronoDuration::milliseconds(self.lease_ms));
        }
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = QueueJobStatus::Completed;
            job.lease_expires_at = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.error = Some(error.to_string());
            job.lease_expires_at = None;
            job.worker_id = None;
            if job.attempt < job.max_attempts {
                job.status = QueueJobStatus::Pending;
                job.run_at = Utc::now() + retry_backoff(job.attempt);
            } else {
                job.status = QueueJobStatus::Failed;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().await;
        let count =
            |status: QueueJobStatus| jobs.iter().filter(|j| j.status == status).count() as i64;
        Ok(QueueStats {
            waiting: count(QueueJobStatus::Pending),
            active: count(QueueJobStatus::Running),
            completed: count(QueueJobStatus::Completed),
            failed: count(QueueJobStatus::Failed),
        })
    }

    async fn trim_finished(&self) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        for (status, keep) in [
            (QueueJobStatus::Completed, KEEP_COMPLETED as usize),
            (QueueJobStatus::Failed, KEEP_FAILED as usize),
        ] {
            let mut finished: Vec<Uuid> = jobs
                .iter()
                .filter(|j| j.status == status)
                .map(|j| (j.enqueued_at, j.id))
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .skip(keep)
                .map(|(_, id)| id)
                .collect();
            finished.sort_unstable();
            jobs.retain(|j| finished.binary_search(&j.id).is_err());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(retry_backoff(1).num_seconds(), 5);
        assert_eq!(retry_backoff(2).num_seconds(), 10);
        assert_eq!(retry_backoff(3).num_seconds(), 20);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_respects_cluster_cap() {
        let queue = MemoryJobQueue::new();
        let user = Uuid::new_v4();
        let first = queue.enqueue(Uuid::new_v4(), user, None).await.unwrap();
        let second = queue.enqueue(Uuid::new_v4(), user, None).await.unwrap();
        let _third = queue.enqueue(Uuid::new_v4(), user, None).await.unwrap();

        let claimed = queue.claim("w1", 10, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, first);
        assert_eq!(claimed[1].id, second);

        // Cluster is full; nothing more to claim.
        let claimed = queue.claim("w2", 10, 2).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn failure_requeues_with_backoff_until_attempts_exhausted() {
        let queue = MemoryJobQueue::new();
        let id = queue
            .enqueue(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();

        for attempt in 1..=MAX_ATTEMPTS {
            // Make any backoff-delayed job immediately claimable again.
            {
                let mut jobs = queue.jobs.lock().await;
                jobs.iter_mut().for_each(|j| j.run_at = Utc::now());
            }
            let claimed = queue.claim("w1", 1, 5).await.unwrap();
            assert_eq!(claimed.len(), 1, "attempt {attempt} should be claimable");
            assert_eq!(claimed[0].attempt, attempt);
            queue.mark_failed(id, "boom").await.unwrap();
        }

        let job = queue.job(id).await.unwrap();
        assert_eq!(job.status, QueueJobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));

        let claimed = queue.claim("w1", 1, 5).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn stalled_running_jobs_are_reclaimable() {
        let queue = MemoryJobQueue::new();
        let id = queue
            .enqueue(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();

        let claimed = queue.claim("w1", 1, 5).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Expire the lease by hand.
        {
            let mut jobs = queue.jobs.lock().await;
            jobs[0].lease_expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }

        let reclaimed = queue.claim("w2", 1, 5).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
        assert_eq!(reclaimed[0].worker_id.as_deref(), Some("w2"));
        assert_eq!(reclaimed[0].attempt, 2);
    }

    #[tokio::test]
    async fn stats_track_lifecycle() {
        let queue = MemoryJobQueue::new();
        let id = queue
            .enqueue(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();
        queue.enqueue(Uuid::new_v4(), Uuid::new_v4(), None).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 2);

        queue.claim("w1", 1, 5).await.unwrap();
        queue.mark_completed(id).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 1);
    }
}

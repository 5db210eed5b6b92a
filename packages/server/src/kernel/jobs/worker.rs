//! Generation worker: claims queued pipeline invocations and runs them.
//!
//! Each worker process serves up to `concurrency` jobs at once behind a
//! semaphore; the cluster-wide cap is enforced at claim time by the queue.
//! Running jobs heartbeat their lease so the stall detector leaves them
//! alone, and shutdown drains in-flight stages for up to the grace period.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::QueueJob;
use super::queue::JobQueue;
use crate::domains::auth::{User, UserStore};
use crate::domains::generations::pipeline::StageRunner;
use crate::kernel::metrics;
use crate::kernel::traits::ProviderCredentials;
use crate::kernel::vault::CredentialCipher;

/// Configuration for the generation worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// In-flight jobs per worker process.
    pub concurrency: usize,
    /// Running jobs across the cluster.
    pub max_cluster: usize,
    /// How long to wait when no jobs are available.
    pub poll_interval: Duration,
    /// How often running jobs extend their lease.
    pub heartbeat_interval: Duration,
    /// Drain window on shutdown.
    pub shutdown_grace: Duration,
    /// Worker ID for this instance.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_cluster: 5,
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

/// Long-running queue consumer.
pub struct GenerationWorker {
    queue: Arc<dyn JobQueue>,
    runner: Arc<StageRunner>,
    users: Arc<dyn UserStore>,
    cipher: CredentialCipher,
    config: WorkerConfig,
}

impl GenerationWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        runner: Arc<StageRunner>,
        users: Arc<dyn UserStore>,
        cipher: CredentialCipher,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            runner,
            users,
            cipher,
            config,
        }
    }

    /// Run until the shutdown token fires, then drain.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            max_cluster = self.config.max_cluster,
            "generation worker starting"
        );

        let slots = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let available = slots.available_permits();
            if available == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
                }
            }

            let jobs = match self
                .queue
                .claim(&self.config.worker_id, available, self.config.max_cluster)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if let Ok(stats) = self.queue.stats().await {
                metrics::queue_depth(stats.waiting, stats.active);
            }

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            debug!(count = jobs.len(), "claimed jobs");

            for job in jobs {
                let permit = slots
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                let worker = self.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    worker.process_job(job, shutdown).await;
                    drop(permit);
                });
            }
        }

        // Drain: wait for in-flight jobs up to the grace period.
        let draining = self.config.concurrency - slots.available_permits();
        if draining > 0 {
            info!(count = draining, "waiting for in-flight jobs to finish");
            let _ = tokio::time::timeout(
                self.config.shutdown_grace,
                slots.acquire_many(self.config.concurrency as u32),
            )
            .await;
        }

        info!(worker_id = %self.config.worker_id, "generation worker stopped");
        Ok(())
    }

    async fn process_job(&self, job: QueueJob, shutdown: CancellationToken) {
        let job_id = job.id;
        let generation_id = job.generation_id;

        info!(
            job_id = %job_id,
            generation_id = %generation_id,
            attempt = job.attempt,
            continue_from = job.continue_from.map(|s| s.as_str()).unwrap_or("start"),
            "processing generation"
        );
        metrics::job_started();

        // Keep the lease alive while the pipeline runs.
        let heartbeat_stop = shutdown.child_token();
        let heartbeat = {
            let queue = self.queue.clone();
            let stop = heartbeat_stop.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // skip the immediate tick
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = queue.heartbeat(job_id).await {
                                warn!(job_id = %job_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            })
        };

        let result = self.execute(&job).await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        match result {
            Ok(()) => {
                info!(job_id = %job_id, generation_id = %generation_id, "job finished");
                if let Err(e) = self.queue.mark_completed(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job completed");
                }
                if let Err(e) = self.queue.trim_finished().await {
                    warn!(error = %e, "queue retention trim failed");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, generation_id = %generation_id, error = %e, "job failed");
                if let Err(mark) = self.queue.mark_failed(job_id, &format!("{e:#}")).await {
                    error!(job_id = %job_id, error = %mark, "failed to mark job failed");
                }
            }
        }
    }

    async fn execute(&self, job: &QueueJob) -> Result<()> {
        let user = self
            .users
            .find_by_id(job.user_id)
            .await?
            .with_context(|| format!("owner {} not found", job.user_id))?;

        let credentials = decrypt_credentials(&user, &self.cipher);

        self.runner
            .run(job.generation_id, &credentials, job.continue_from)
            .await
    }
}

/// Decrypt the principal's provider credentials for one job invocation.
/// Undecryptable envelopes are treated as absent.
pub fn decrypt_credentials(user: &User, cipher: &CredentialCipher) -> ProviderCredentials {
    let decrypt = |stored: &Option<String>| -> Option<String> {
        let stored = stored.as_deref()?;
        match cipher.decrypt(stored) {
            Ok(plain) if !plain.is_empty() => Some(plain),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "credential decryption failed");
                None
            }
        }
    };

    ProviderCredentials {
        openrouter: decrypt(&user.openrouter.encrypted),
        supabase: decrypt(&user.supabase.encrypted),
        firecrawl: decrypt(&user.firecrawl.encrypted),
    }
}

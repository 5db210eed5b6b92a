//! Worker integration: claim → decrypt credentials → run pipeline → settle
//! queue state. In-memory queue and stores, scripted providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{scripted_chat, PipelineHarness};
use draftforge::domains::auth::models::StoredCredential;
use draftforge::domains::auth::{MemoryUserStore, User, UserStore};
use draftforge::domains::generations::{GenerationStatus, GenerationStore};
use draftforge::kernel::jobs::{
    GenerationWorker, JobQueue, MemoryJobQueue, QueueJobStatus, WorkerConfig,
};
use draftforge::kernel::vault::CredentialCipher;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SECRET: &str = "a-token-signing-secret-with-plenty-of-length";

async fn seeded_user(cipher: &CredentialCipher, users: &MemoryUserStore) -> User {
    let sealed = |value: &str| StoredCredential {
        encrypted: Some(cipher.encrypt(value).unwrap()),
        is_valid: Some(true),
        last_validated_at: None,
    };

    let user = User {
        id: Uuid::new_v4(),
        email: "writer@example.com".into(),
        password_hash: "irrelevant".into(),
        pin_hash: None,
        openrouter: sealed("or-key"),
        supabase: sealed("sb-key"),
        firecrawl: sealed("fc-key"),
        created_at: Utc::now(),
    };
    users.insert(&user).await.unwrap();
    user
}

#[tokio::test]
async fn worker_drives_a_queued_generation_to_completion() {
    let harness = PipelineHarness::new(scripted_chat(true));
    let cipher = CredentialCipher::new(None, SECRET).unwrap();

    let users = Arc::new(MemoryUserStore::new());
    let user = seeded_user(&cipher, &users).await;

    let mut generation = harness.insert_generation(true, vec![]).await;
    generation.user_id = user.id;
    harness.store.insert(&generation).await.unwrap();

    let queue = Arc::new(MemoryJobQueue::new());
    let job_id = queue.enqueue(generation.id, user.id, None).await.unwrap();

    let worker = Arc::new(GenerationWorker::new(
        queue.clone(),
        Arc::new(harness.runner),
        users,
        cipher,
        WorkerConfig {
            concurrency: 2,
            max_cluster: 5,
            poll_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(2),
            worker_id: "test-worker".into(),
        },
    ));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    // Wait for the generation to reach a terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = harness.store.fetch(generation.id).await.unwrap().unwrap();
        if current.status.is_terminal() {
            assert_eq!(current.status, GenerationStatus::Completed);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "generation never finished, status {}",
            current.status.as_str()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Queue record settles to completed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = queue.job(job_id).await.unwrap();
        if job.status == QueueJobStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never completed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    shutdown.cancel();
    let _ = handle.await.unwrap();
}

#[tokio::test]
async fn failed_runs_are_retried_then_given_up() {
    use draftforge::kernel::test_dependencies::{MockChat, MockSerpFetcher, TestProviders};

    // Chat always fails: every attempt dies in structure analysis.
    let harness = PipelineHarness::with_providers(
        TestProviders::new()
            .serp(MockSerpFetcher::new().with_entries(MockSerpFetcher::standard_entries()))
            .chat(MockChat::failing("HTTP 500"))
            .answers(common::standard_answers()),
    );
    let cipher = CredentialCipher::new(None, SECRET).unwrap();

    let users = Arc::new(MemoryUserStore::new());
    let user = seeded_user(&cipher, &users).await;

    let mut generation = harness.insert_generation(true, vec![]).await;
    generation.user_id = user.id;
    harness.store.insert(&generation).await.unwrap();

    let queue = Arc::new(MemoryJobQueue::new());
    let job_id = queue.enqueue(generation.id, user.id, None).await.unwrap();

    let worker = Arc::new(GenerationWorker::new(
        queue.clone(),
        Arc::new(harness.runner),
        users,
        cipher,
        WorkerConfig {
            concurrency: 1,
            max_cluster: 5,
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(2),
            worker_id: "test-worker".into(),
        },
    ));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    // Attempts 2 and 3 sit behind 5s/10s backoffs; fast-forward them so
    // the test stays quick.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        {
            let job = queue.job(job_id).await.unwrap();
            if job.status == QueueJobStatus::Failed {
                assert_eq!(job.attempt, 3);
                assert!(job.error.as_deref().unwrap_or("").contains("HTTP 500"));
                break;
            }
        }
        queue.make_runnable_now(job_id).await;
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never exhausted its retries"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    shutdown.cancel();
    let _ = handle.await.unwrap();
}

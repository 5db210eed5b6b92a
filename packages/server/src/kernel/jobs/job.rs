//! Queue job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::generations::models::GenerationStatus;

/// Queue-side lifecycle of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl QueueJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueJobStatus::Pending => "pending",
            QueueJobStatus::Running => "running",
            QueueJobStatus::Completed => "completed",
            QueueJobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueJobStatus::Pending),
            "running" => Some(QueueJobStatus::Running),
            "completed" => Some(QueueJobStatus::Completed),
            "failed" => Some(QueueJobStatus::Failed),
            _ => None,
        }
    }
}

/// One queued pipeline invocation. A generation re-enters the queue once
/// per `continue` request, so `generation_id` is not unique here.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub user_id: Uuid,
    /// Pause state this invocation resumes from, if any.
    pub continue_from: Option<GenerationStatus>,
    pub status: QueueJobStatus,
    /// Attempts consumed, incremented on claim.
    pub attempt: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl QueueJob {
    pub fn new(
        generation_id: Uuid,
        user_id: Uuid,
        continue_from: Option<GenerationStatus>,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            generation_id,
            user_id,
            continue_from,
            status: QueueJobStatus::Pending,
            attempt: 0,
            max_attempts,
            run_at: now,
            enqueued_at: now,
            lease_expires_at: None,
            worker_id: None,
            error: None,
        }
    }
}

/// Point-in-time queue counters for the stats endpoint and gauges.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_roundtrip() {
        for status in [
            QueueJobStatus::Pending,
            QueueJobStatus::Running,
            QueueJobStatus::Completed,
            QueueJobStatus::Failed,
        ] {
            assert_eq!(QueueJobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueueJobStatus::parse("dead_letter"), None);
    }

    #[test]
    fn new_jobs_are_pending_and_runnable_now() {
        let job = QueueJob::new(Uuid::new_v4(), Uuid::new_v4(), None, 3);
        assert_eq!(job.status, QueueJobStatus::Pending);
        assert_eq!(job.attempt, 0);
        assert!(job.run_at <= Utc::now());
    }
}

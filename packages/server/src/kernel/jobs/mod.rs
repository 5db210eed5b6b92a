//! Job queue and worker pool.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{QueueJob, QueueJobStatus, QueueStats};
pub use queue::{JobQueue, MemoryJobQueue, PostgresJobQueue, MAX_ATTEMPTS};
pub use worker::{decrypt_credentials, GenerationWorker, WorkerConfig};

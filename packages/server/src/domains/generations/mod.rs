//! Generations domain: the job record, its durable store, the LLM
//! operations and the stage pipeline.

pub mod links;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod store;

pub use models::{Generation, GenerationStatus};
pub use pipeline::{PipelineConfig, StageRunner};
pub use store::{GenerationStore, MemoryGenerationStore, PostgresGenerationStore};

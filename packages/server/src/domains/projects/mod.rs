//! Projects domain: owner-scoped containers for generations.

pub mod models;
pub mod store;

pub use models::Project;
pub use store::{MemoryProjectStore, PostgresProjectStore, ProjectStore};

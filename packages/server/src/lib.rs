// Draftforge - article generation pipeline
//
// This crate provides the backend for long-running article-generation jobs:
// a durable seven-stage pipeline fed by a Postgres-backed queue, with
// progress fanned out to live subscribers over NATS.
//
// Two binaries share this library: `api` (HTTP surface + subscription
// gateway) and `worker` (queue consumer + stage runner).

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;

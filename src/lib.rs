//! # taskq
//!
//! Persistent priority task queue for pools of independent workers.
//!
//! Producers enqueue tasks (deduplicated on type and configuration digest),
//! workers claim them through a single compare-and-swap on the store, run
//! them as child processes while streaming logs and watching for
//! cancellation, and report the terminal outcome. Postgres (via sqlx) is the
//! durable store; an in-memory store backs tests and development.

pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod wire;
pub mod worker;

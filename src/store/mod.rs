//! Task Store contract.
//!
//! The store is the only shared mutable resource. Every method is one
//! indivisible operation against it; the queue engine composes them but never
//! reads a row, decides, and writes it back as separate steps.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ClaimFilter, Finalize, ListQuery, NewTask, State, Task, TaskId};

/// Outcome of inserting a task under the dedup key.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Box<Task>),
    /// A non-terminal task already holds `(task_type, config_hash)`.
    Duplicate(TaskId),
}

/// Message for a boost when some task already holds `i32::MAX`.
pub const PRIORITY_EXHAUSTED: &str = "priority is already at its maximum";

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a Queued, unassigned task unless a non-terminal task already
    /// holds the same `(task_type, config_hash)`.
    async fn insert(&self, new: &NewTask, config_hash: &str) -> Result<InsertOutcome>;

    /// Fetch a task. Unknown ids are `Error::NotFound`.
    async fn get(&self, id: TaskId) -> Result<Task>;

    /// Highest-priority non-terminal task owned by `worker`.
    async fn find_assigned(&self, worker: &str) -> Result<Option<Task>>;

    /// Up to `limit` Queued, unassigned tasks matching `filter`, highest
    /// priority first.
    async fn claim_candidates(&self, filter: &ClaimFilter, limit: i64) -> Result<Vec<TaskId>>;

    /// Compare-and-swap: assign `id` to `worker` and mark it Running only if
    /// it is still unassigned and Queued. Returns whether this caller won.
    async fn try_assign(&self, id: TaskId, worker: &str) -> Result<bool>;

    /// Set the task's priority to one above the current maximum, computed by
    /// the store in the same operation. Fails with `Error::Validation` when
    /// no priority above the maximum exists.
    async fn boost_priority(&self, id: TaskId) -> Result<Task>;

    /// Move `id` from `from` to `to` only if it is currently in `from`.
    async fn transition(&self, id: TaskId, from: State, to: State) -> Result<bool>;

    /// Append text to the task log.
    async fn append_log(&self, id: TaskId, text: &str) -> Result<Task>;

    /// Write the terminal fields if the task is currently in one of `from`.
    /// Returns `None` when the guard did not match.
    async fn finalize(&self, id: TaskId, from: &[State], fin: &Finalize) -> Result<Option<Task>>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Task>>;

    async fn health_check(&self) -> Result<()>;
}

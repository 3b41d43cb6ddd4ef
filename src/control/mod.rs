//! The Control API contract.
//!
//! Producers, operators and workers talk to the queue through [`ControlApi`].
//! [`Engine`] implements it in-process; [`http::HttpClient`] implements it
//! against a remote `taskq serve`.

pub mod http;

use async_trait::async_trait;

use crate::engine::Engine;
use crate::error::Result;
use crate::model::{CancelMode, ClaimFilter, Finalize, ListQuery, NewTask, Task, TaskId};
use crate::wire::TaskSummary;

pub use http::HttpClient;

#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Fails with `Error::Duplicate` naming the existing task.
    async fn enqueue(&self, new: NewTask) -> Result<Task>;

    /// `None` means no work is available for this worker.
    async fn claim(&self, worker: &str, filter: &ClaimFilter) -> Result<Option<Task>>;

    async fn get(&self, id: TaskId) -> Result<Task>;

    async fn patch_log(&self, id: TaskId, log_append: &str) -> Result<Task>;

    async fn finalize(&self, id: TaskId, fin: &Finalize) -> Result<Task>;

    async fn cancel(&self, id: TaskId, mode: CancelMode) -> Result<Task>;

    async fn priority_boost(&self, id: TaskId) -> Result<Task>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<TaskSummary>>;
}

#[async_trait]
impl ControlApi for Engine {
    async fn enqueue(&self, new: NewTask) -> Result<Task> {
        Engine::enqueue(self, new).await
    }

    async fn claim(&self, worker: &str, filter: &ClaimFilter) -> Result<Option<Task>> {
        Engine::claim(self, worker, filter).await
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        Engine::get(self, id).await
    }

    async fn patch_log(&self, id: TaskId, log_append: &str) -> Result<Task> {
        Engine::patch_log(self, id, log_append).await
    }

    async fn finalize(&self, id: TaskId, fin: &Finalize) -> Result<Task> {
        Engine::finalize(self, id, fin.clone()).await
    }

    async fn cancel(&self, id: TaskId, mode: CancelMode) -> Result<Task> {
        Engine::cancel(self, id, mode).await
    }

    async fn priority_boost(&self, id: TaskId) -> Result<Task> {
        Engine::priority_boost(self, id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<TaskSummary>> {
        let tasks = Engine::list(self, query).await?;
        Ok(tasks.iter().map(TaskSummary::from).collect())
    }
}

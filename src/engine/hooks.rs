//! Post-enqueue hooks.
//!
//! Hooks are handed to [`Engine::new`](super::Engine::new) as an ordered list
//! and run one after another once a task has been stored. A failing hook is
//! logged by the engine and does not undo or fail the enqueue.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Task;

#[async_trait]
pub trait EnqueueHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn after_enqueue(&self, task: &Task) -> Result<()>;
}

/// Emits one structured `taskq::audit` event per enqueued task.
#[derive(Debug, Default)]
pub struct AuditHook;

#[async_trait]
impl EnqueueHook for AuditHook {
    fn name(&self) -> &str {
        "audit"
    }

    async fn after_enqueue(&self, task: &Task) -> Result<()> {
        tracing::info!(
            target: "taskq::audit",
            task_id = task.id.0,
            task_type = %task.task_type,
            priority = task.priority,
            config_hash = %task.config_hash,
            labels = ?task.worker_labels,
            "task enqueued"
        );
        Ok(())
    }
}

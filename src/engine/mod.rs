//! Queue engine: enqueue with dedup, race-free claim, priority boost,
//! cooperative cancellation, log appends, finalization and listing.
//!
//! The engine holds no locks of its own. Every correctness property rests on
//! the single-operation primitives of the [`TaskStore`], so any number of
//! engines (one per server process) may share one store.

pub mod hooks;

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{
    CancelMode, ClaimFilter, Finalize, ListQuery, NewTask, State, Task, TaskId, config_hash,
    validate_task_type,
};
use crate::store::{InsertOutcome, TaskStore};
use crate::telemetry::metrics;

pub use hooks::{AuditHook, EnqueueHook};

/// Number of claim candidates fetched per attempt.
pub const CLAIM_WINDOW: i64 = 5;

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn TaskStore>,
    hooks: Vec<Arc<dyn EnqueueHook>>,
}

impl Engine {
    pub fn new(store: Arc<dyn TaskStore>, hooks: Vec<Arc<dyn EnqueueHook>>) -> Self {
        Self { store, hooks }
    }

    /// Store a new Queued task.
    ///
    /// Fails with [`Error::Duplicate`] when a non-terminal task with the same
    /// type and configuration digest exists.
    pub async fn enqueue(&self, new: NewTask) -> Result<Task> {
        validate_task_type(&new.task_type)?;
        if new.worker_labels.iter().any(|l| l.trim().is_empty()) {
            return Err(Error::Validation("worker labels must not be blank".into()));
        }

        let hash = config_hash(&new.configuration);
        let outcome = self.store.insert(&new, &hash).await;

        let result_label = match &outcome {
            Ok(InsertOutcome::Inserted(_)) => "ok",
            Ok(InsertOutcome::Duplicate(_)) => "duplicate",
            Err(_) => "error",
        };
        metrics::tasks_enqueued().add(
            1,
            &[
                KeyValue::new("task_type", new.task_type.clone()),
                KeyValue::new("result", result_label),
            ],
        );

        let task = match outcome? {
            InsertOutcome::Inserted(task) => *task,
            InsertOutcome::Duplicate(existing) => {
                debug!(task_type = %new.task_type, %existing, "duplicate enqueue rejected");
                return Err(Error::Duplicate { existing });
            }
        };

        info!(
            id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "task enqueued"
        );

        for hook in &self.hooks {
            if let Err(e) = hook.after_enqueue(&task).await {
                warn!(hook = hook.name(), id = %task.id, error = %e, "enqueue hook failed");
            }
        }

        Ok(task)
    }

    /// Give `worker` one task to run, or `None` when nothing is claimable.
    ///
    /// A worker that already owns a non-terminal task gets that task back.
    /// Otherwise up to [`CLAIM_WINDOW`] candidates are tried in priority
    /// order with the store's compare-and-swap; losing a race moves on to the
    /// next candidate.
    pub async fn claim(&self, worker: &str, filter: &ClaimFilter) -> Result<Option<Task>> {
        if worker.trim().is_empty() {
            return Err(Error::Validation("worker name must not be empty".into()));
        }

        if let Some(task) = self.store.find_assigned(worker).await? {
            debug!(worker, id = %task.id, state = %task.state, "worker reattached to task");
            record_claim("reattached");
            return Ok(Some(task));
        }

        let candidates = self.store.claim_candidates(filter, CLAIM_WINDOW).await?;
        for id in candidates {
            if self.store.try_assign(id, worker).await? {
                record_claim("won");
                metrics::record_transition(State::Queued.as_str(), State::Running.as_str());
                let task = self.store.get(id).await?;
                info!(worker, id = %task.id, task_type = %task.task_type, "task claimed");
                return Ok(Some(task));
            }
            debug!(worker, %id, "lost claim race");
            record_claim("lost");
        }

        record_claim("empty");
        Ok(None)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task> {
        self.store.get(id).await
    }

    /// Raise the task above every other task in the queue.
    pub async fn priority_boost(&self, id: TaskId) -> Result<Task> {
        let task = self.store.boost_priority(id).await?;
        info!(%id, priority = task.priority, "task priority boosted");
        Ok(task)
    }

    /// Cancel a Queued task outright or flag a Running one for cooperative
    /// cancellation.
    ///
    /// A task whose state does not fit `mode` is returned unchanged.
    pub async fn cancel(&self, id: TaskId, mode: CancelMode) -> Result<Task> {
        let task = self.store.get(id).await?;

        let (from, to) = match (mode, task.state) {
            (CancelMode::Queued | CancelMode::Any, State::Queued) => {
                (State::Queued, State::Cancelled)
            }
            (CancelMode::Running | CancelMode::Any, State::Running) => {
                (State::Running, State::CancellationRequested)
            }
            _ => {
                debug!(%id, state = %task.state, ?mode, "cancel does not apply");
                return Ok(task);
            }
        };

        if self.store.transition(id, from, to).await? {
            metrics::record_transition(from.as_str(), to.as_str());
            info!(%id, %from, %to, "task cancel applied");
        } else {
            // Claimed or finished in between; leave it to the new state.
            debug!(%id, %from, "task state changed before cancel");
        }

        self.store.get(id).await
    }

    /// Append output to the task log.
    pub async fn patch_log(&self, id: TaskId, text: &str) -> Result<Task> {
        let result = self.store.append_log(id, text).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::log_appends().add(1, &[KeyValue::new("result", label)]);
        result
    }

    /// Record the terminal outcome of a task.
    ///
    /// Finalizing a task that is already terminal returns it unchanged, so a
    /// worker retrying after a lost response is harmless.
    pub async fn finalize(&self, id: TaskId, fin: Finalize) -> Result<Task> {
        if !fin.state.is_terminal() {
            return Err(Error::Validation(format!(
                "finalize state must be finished or cancelled, got {}",
                fin.state
            )));
        }
        if !fin.runtime.is_finite() || fin.runtime < 0.0 {
            return Err(Error::Validation(format!(
                "runtime must be a non-negative number, got {}",
                fin.runtime
            )));
        }

        let from: Vec<State> = [State::Running, State::CancellationRequested]
            .into_iter()
            .filter(|s| s.can_transition_to(fin.state))
            .collect();

        match self.store.finalize(id, &from, &fin).await? {
            Some(task) => {
                metrics::task_runtime_s().record(
                    fin.runtime,
                    &[
                        KeyValue::new("task_type", task.task_type.clone()),
                        KeyValue::new("state", task.state.as_str()),
                    ],
                );
                info!(
                    %id,
                    state = %task.state,
                    success = task.success,
                    runtime = fin.runtime,
                    "task finalized"
                );
                Ok(task)
            }
            None => {
                let current = self.store.get(id).await?;
                if current.state.is_terminal() {
                    debug!(%id, state = %current.state, "task already final");
                    Ok(current)
                } else {
                    Err(Error::InvalidTransition {
                        from: current.state,
                        to: fin.state,
                    })
                }
            }
        }
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Task>> {
        self.store.list(query).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

fn record_claim(result: &'static str) {
    metrics::claims().add(1, &[KeyValue::new("result", result)]);
}

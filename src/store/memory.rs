//! In-memory task store.
//!
//! Mirrors the Postgres contract with a single mutex: each method body is one
//! critical section, so the conditional updates are as indivisible as their
//! SQL counterparts. Used for tests and single-process development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{InsertOutcome, PRIORITY_EXHAUSTED, TaskStore};
use crate::error::{Error, Result};
use crate::model::{ClaimFilter, Finalize, ListQuery, NewTask, State, Task, TaskId};

struct MemoryState {
    tasks: BTreeMap<TaskId, Task>,
    next_id: i64,
}

pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(tasks: &mut BTreeMap<TaskId, Task>, id: TaskId) -> Result<&mut Task> {
    tasks.get_mut(&id).ok_or(Error::NotFound(id))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, new: &NewTask, config_hash: &str) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;

        let existing = state.tasks.values().find(|t| {
            !t.state.is_terminal() && t.task_type == new.task_type && t.config_hash == config_hash
        });
        if let Some(existing) = existing {
            return Ok(InsertOutcome::Duplicate(existing.id));
        }

        let id = TaskId(state.next_id);
        state.next_id += 1;
        let now = Utc::now();
        let task = Task {
            id,
            priority: new.priority,
            description: new.description.clone(),
            task_type: new.task_type.clone(),
            configuration: new.configuration.clone(),
            config_hash: config_hash.to_string(),
            assigned_to: String::new(),
            state: State::Queued,
            created: now,
            last_updated: now,
            result: serde_json::json!({}),
            success: false,
            runtime: None,
            log: String::new(),
            worker_labels: new.worker_labels.clone(),
        };
        state.tasks.insert(id, task.clone());
        Ok(InsertOutcome::Inserted(Box::new(task)))
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        let state = self.state.lock().await;
        state.tasks.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    async fn find_assigned(&self, worker: &str) -> Result<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.assigned_to == worker && !t.state.is_terminal())
            // max_by_key keeps the last maximum; iterate newest-first so ties
            // resolve to the lowest id like the SQL ordering.
            .rev()
            .max_by_key(|t| t.priority)
            .cloned())
    }

    async fn claim_candidates(&self, filter: &ClaimFilter, limit: i64) -> Result<Vec<TaskId>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.state == State::Queued && !t.is_assigned() && filter.matches(t))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| t.id)
            .collect())
    }

    async fn try_assign(&self, id: TaskId, worker: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.is_assigned() || task.state != State::Queued {
            return Ok(false);
        }
        task.assigned_to = worker.to_string();
        task.state = State::Running;
        task.last_updated = Utc::now();
        Ok(true)
    }

    async fn boost_priority(&self, id: TaskId) -> Result<Task> {
        let mut state = self.state.lock().await;
        let max = state.tasks.values().map(|t| t.priority).max().unwrap_or(0);
        let task = lookup(&mut state.tasks, id)?;
        task.priority = max
            .checked_add(1)
            .ok_or_else(|| Error::Validation(PRIORITY_EXHAUSTED.into()))?;
        task.last_updated = Utc::now();
        Ok(task.clone())
    }

    async fn transition(&self, id: TaskId, from: State, to: State) -> Result<bool> {
        let mut state = self.state.lock().await;
        let task = lookup(&mut state.tasks, id)?;
        if task.state != from {
            return Ok(false);
        }
        task.state = to;
        task.last_updated = Utc::now();
        Ok(true)
    }

    async fn append_log(&self, id: TaskId, text: &str) -> Result<Task> {
        let mut state = self.state.lock().await;
        let task = lookup(&mut state.tasks, id)?;
        task.log.push_str(text);
        task.last_updated = Utc::now();
        Ok(task.clone())
    }

    async fn finalize(&self, id: TaskId, from: &[State], fin: &Finalize) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        let task = lookup(&mut state.tasks, id)?;
        if !from.contains(&task.state) {
            return Ok(None);
        }
        if fin.log.len() >= task.log.len() {
            task.log = fin.log.clone();
        }
        task.state = fin.state;
        task.success = fin.success;
        task.result = fin.result.clone();
        task.runtime = Some(fin.runtime);
        task.last_updated = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let states = query.states();
        let mut tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| states.as_ref().is_none_or(|s| s.contains(&t.state)))
            .collect();

        let ordering = query.effective_ordering();
        tasks.sort_by(|a, b| {
            ordering
                .iter()
                .map(|o| {
                    let ord = o.column.compare(a, b);
                    match o.direction {
                        crate::model::Direction::Asc => ord,
                        crate::model::Direction::Desc => ord.reverse(),
                    }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(tasks
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A bare Queued task for unit tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn sample_task(id: TaskId, task_type: &str) -> Task {
    let now = Utc::now();
    Task {
        id,
        priority: 0,
        description: String::new(),
        task_type: task_type.to_string(),
        configuration: serde_json::json!({}),
        config_hash: crate::model::config_hash(&serde_json::json!({})),
        assigned_to: String::new(),
        state: State::Queued,
        created: now,
        last_updated: now,
        result: serde_json::json!({}),
        success: false,
        runtime: None,
        log: String::new(),
        worker_labels: Vec::new(),
    }
}

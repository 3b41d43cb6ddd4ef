//! JSON representations exchanged over the Control API.
//!
//! The [`Task`] entity carries no serde derives; these types are the only
//! serialized forms, and the `From` impls below are the only mapping between
//! the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ClaimFilter, Finalize, ListQuery, NewTask, OrderBy, State, Task, TaskId};

/// Full task, as returned by single-task operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetailed {
    pub id: TaskId,
    pub priority: i32,
    pub description: String,
    pub task_type: String,
    pub configuration: serde_json::Value,
    pub config_hash: String,
    pub assigned_to: String,
    pub state: State,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub result: serde_json::Value,
    pub success: bool,
    pub runtime: Option<f64>,
    pub log: String,
    #[serde(default)]
    pub worker_labels: Vec<String>,
}

/// Listing row: the task without its configuration, result or log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub priority: i32,
    pub description: String,
    pub task_type: String,
    pub assigned_to: String,
    pub state: State,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub success: bool,
    pub runtime: Option<f64>,
    #[serde(default)]
    pub worker_labels: Vec<String>,
}

impl From<&Task> for TaskDetailed {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            priority: task.priority,
            description: task.description.clone(),
            task_type: task.task_type.clone(),
            configuration: task.configuration.clone(),
            config_hash: task.config_hash.clone(),
            assigned_to: task.assigned_to.clone(),
            state: task.state,
            created: task.created,
            last_updated: task.last_updated,
            result: task.result.clone(),
            success: task.success,
            runtime: task.runtime,
            log: task.log.clone(),
            worker_labels: task.worker_labels.clone(),
        }
    }
}

impl From<TaskDetailed> for Task {
    fn from(wire: TaskDetailed) -> Self {
        Self {
            id: wire.id,
            priority: wire.priority,
            description: wire.description,
            task_type: wire.task_type,
            configuration: wire.configuration,
            config_hash: wire.config_hash,
            assigned_to: wire.assigned_to,
            state: wire.state,
            created: wire.created,
            last_updated: wire.last_updated,
            result: wire.result,
            success: wire.success,
            runtime: wire.runtime,
            log: wire.log,
            worker_labels: wire.worker_labels,
        }
    }
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            priority: task.priority,
            description: task.description.clone(),
            task_type: task.task_type.clone(),
            assigned_to: task.assigned_to.clone(),
            state: task.state,
            created: task.created,
            last_updated: task.last_updated,
            success: task.success,
            runtime: task.runtime,
            worker_labels: task.worker_labels.clone(),
        }
    }
}

/// Body of every non-success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    /// Set on duplicate enqueues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_task_id: Option<TaskId>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task_type: String,
    #[serde(default = "empty_object")]
    pub configuration: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub worker_labels: Vec<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl From<EnqueueRequest> for NewTask {
    fn from(req: EnqueueRequest) -> Self {
        NewTask::new(req.task_type)
            .configuration(req.configuration)
            .priority(req.priority)
            .description(req.description)
            .worker_labels(req.worker_labels)
    }
}

impl From<&NewTask> for EnqueueRequest {
    fn from(new: &NewTask) -> Self {
        Self {
            task_type: new.task_type.clone(),
            configuration: new.configuration.clone(),
            priority: new.priority,
            description: new.description.clone(),
            worker_labels: new.worker_labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_name: String,
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl ClaimRequest {
    pub fn new(worker_name: &str, filter: &ClaimFilter) -> Self {
        Self {
            worker_name: worker_name.to_string(),
            task_types: filter.task_types.clone(),
            labels: filter.labels.clone(),
        }
    }

    pub fn filter(&self) -> ClaimFilter {
        ClaimFilter {
            task_types: self.task_types.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchLogRequest {
    pub log_append: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub log: String,
    pub state: State,
    pub success: bool,
    #[serde(default = "empty_object")]
    pub result: serde_json::Value,
    pub runtime: f64,
}

impl From<FinalizeRequest> for Finalize {
    fn from(req: FinalizeRequest) -> Self {
        Self {
            log: req.log,
            state: req.state,
            success: req.success,
            result: req.result,
            runtime: req.runtime,
        }
    }
}

impl From<&Finalize> for FinalizeRequest {
    fn from(fin: &Finalize) -> Self {
        Self {
            log: fin.log.clone(),
            state: fin.state,
            success: fin.success,
            result: fin.result.clone(),
            runtime: fin.runtime,
        }
    }
}

/// Query string of the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// `column:direction[,column:direction...]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<String>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub queued: bool,
}

impl ListParams {
    pub fn into_query(self) -> Result<ListQuery> {
        let ordering = match self.ordering.as_deref() {
            Some(text) => OrderBy::parse_list(text)?,
            None => Vec::new(),
        };
        Ok(ListQuery {
            running: self.running,
            finished: self.finished,
            queued: self.queued,
            ordering,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

impl From<&ListQuery> for ListParams {
    fn from(query: &ListQuery) -> Self {
        Self {
            limit: query.limit,
            offset: query.offset,
            ordering: (!query.ordering.is_empty()).then(|| OrderBy::format_list(&query.ordering)),
            running: query.running,
            finished: query.finished,
            queued: query.queued,
        }
    }
}

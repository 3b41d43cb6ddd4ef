//! Core data model.
//!
//! A task is a unit of work pulled from the shared queue by exactly one
//! worker. It has identity (server-assigned id), a dedup key
//! (`task_type` + `config_hash`), priority, and lifecycle state.

pub mod hash;
pub mod query;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use hash::config_hash;
pub use query::{Direction, ListQuery, OrderBy, SortColumn};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task as stored by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Server-assigned, immutable identifier.
    pub id: TaskId,

    /// Higher claims first.
    pub priority: i32,

    /// Human-readable label.
    pub description: String,

    /// Executable work function, namespaced (e.g. "bags.extract.topics").
    pub task_type: String,

    /// Opaque payload passed to the work function.
    pub configuration: serde_json::Value,

    /// Digest of the canonical `configuration`, part of the dedup key.
    pub config_hash: String,

    /// Owning worker. Empty string means claimable, never null.
    pub assigned_to: String,

    pub state: State,

    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    /// Written only at completion.
    pub result: serde_json::Value,
    pub success: bool,

    /// Elapsed execution seconds, set at completion.
    pub runtime: Option<f64>,

    /// Append-only output of the work function.
    pub log: String,

    /// Capability tags a worker must advertise to claim this task.
    pub worker_labels: Vec<String>,
}

impl Task {
    pub fn is_assigned(&self) -> bool {
        !self.assigned_to.is_empty()
    }
}

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(TaskId)
            .map_err(|_| Error::Validation(format!("invalid task identifier: {s}")))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Codes at or above this value are terminal.
pub const TERMINAL_THRESHOLD: i16 = 100;

/// Lifecycle state of a task.
///
/// The numeric codes are what the store persists. Terminal states sit at or
/// above [`TERMINAL_THRESHOLD`] so "still active" is a single range check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for a worker.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Recognized but unused; nothing moves a task in or out of it.
    Paused,
    /// Operator asked a running task to stop; the worker has not yet honored it.
    CancellationRequested,
    /// Executed to completion (successfully or not). Terminal.
    Finished,
    /// Cancelled before or during execution. Terminal.
    Cancelled,
}

impl State {
    pub const ALL: [State; 6] = [
        State::Queued,
        State::Running,
        State::Paused,
        State::CancellationRequested,
        State::Finished,
        State::Cancelled,
    ];

    pub fn code(self) -> i16 {
        match self {
            State::Queued => 0,
            State::Running => 1,
            State::Paused => 2,
            State::CancellationRequested => 50,
            State::Finished => 100,
            State::Cancelled => 101,
        }
    }

    pub fn from_code(code: i16) -> Result<Self> {
        State::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| Error::Other(format!("unknown task state code: {code}")))
    }

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, CancellationRequested)
                | (Running, Finished)
                | (CancellationRequested, Finished)
                | (CancellationRequested, Cancelled)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        self.code() >= TERMINAL_THRESHOLD
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Queued => "queued",
            State::Running => "running",
            State::Paused => "paused",
            State::CancellationRequested => "cancellation_requested",
            State::Finished => "finished",
            State::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown state: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new tasks. The engine's public API for enqueueing work.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) task_type: String,
    pub(crate) configuration: serde_json::Value,
    pub(crate) priority: i32,
    pub(crate) description: String,
    pub(crate) worker_labels: Vec<String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            configuration: serde_json::json!({}),
            priority: 0,
            description: String::new(),
            worker_labels: Vec::new(),
        }
    }

    pub fn configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn worker_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Check that a task type is a dotted name like `bags.extract.topics`.
pub fn validate_task_type(task_type: &str) -> Result<()> {
    let valid = !task_type.is_empty()
        && task_type.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid task type: {task_type:?}")))
    }
}

// ---------------------------------------------------------------------------
// Operation inputs
// ---------------------------------------------------------------------------

/// What a worker is able to run.
///
/// An empty `task_types` list accepts any type. Labels are matched against
/// the task's `worker_labels`: every label the task asks for must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFilter {
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl ClaimFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, task: &Task) -> bool {
        let type_ok = self.task_types.is_empty() || self.task_types.contains(&task.task_type);
        let labels_ok = task
            .worker_labels
            .iter()
            .all(|required| self.labels.contains(required));
        type_ok && labels_ok
    }
}

/// Terminal fields written by a worker once its task has stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalize {
    pub log: String,
    pub state: State,
    pub success: bool,
    pub result: serde_json::Value,
    pub runtime: f64,
}

/// Which cancellation an operator asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Only cancel a task that has not started.
    Queued,
    /// Only request cancellation of a running task.
    Running,
    /// Whichever applies to the task's current state.
    #[default]
    Any,
}

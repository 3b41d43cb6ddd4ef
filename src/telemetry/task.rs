//! Task execution span helpers.

use tracing::Span;

use crate::model::TaskId;

/// Start a span covering one task's execution on a worker.
///
/// The `task.state` field is declared empty and filled in by
/// [`record_state_transition`].
pub fn start_task_span(task_type: &str, id: TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.type" = task_type,
        "task.id" = id.0,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition as an event inside `span` and update its
/// `task.state` field.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("task.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

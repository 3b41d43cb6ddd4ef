//! Metric instruments for the queue and its workers.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: enqueue attempts.
/// Labels: `task_type`, `result` ("ok" | "duplicate" | "error").
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.enqueued")
        .with_description("Number of enqueue attempts")
        .build()
}

/// Counter: claim outcomes.
/// Labels: `result` ("won" | "lost" | "reattached" | "empty").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.claims")
        .with_description("Claim attempts by outcome")
        .build()
}

/// Counter: task state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.state_transitions")
        .with_description("Number of task state transitions")
        .build()
}

/// Counter: log append calls.
/// Labels: `result` ("ok" | "error").
pub fn log_appends() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.log_appends")
        .with_description("Number of task log appends")
        .build()
}

/// Histogram: task runtime reported at finalization.
/// Labels: `task_type`, `state`.
pub fn task_runtime_s() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.task.runtime_s")
        .with_description("Task execution time in seconds")
        .with_unit("s")
        .build()
}

/// Counter: failed Control API calls made by a worker.
/// Labels: `operation`.
pub fn worker_control_errors() -> Counter<u64> {
    meter()
        .u64_counter("taskq.worker.control_errors")
        .with_description("Failed Control API calls from workers")
        .build()
}

/// Record one state transition on the counter.
pub fn record_transition(from: &str, to: &str) {
    state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

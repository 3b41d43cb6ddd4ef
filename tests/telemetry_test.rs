//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::KeyValue;
use taskq::model::TaskId;
use taskq::telemetry::{TelemetryConfig, init_telemetry, metrics, task};

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process; a second
    // init in the same binary returns Err, which is acceptable here.
    if let Ok(guard) = init_telemetry(TelemetryConfig::new("taskq-test").log_level("warn")) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn task_span_records_transitions() {
    let span = task::start_task_span("bags.extract", TaskId(42));
    task::record_state_transition(&span, "claimed", "running");
    task::record_state_transition(&span, "running", "finished");
}

#[test]
fn metrics_record_without_exporter() {
    metrics::tasks_enqueued().add(1, &[KeyValue::new("task_type", "bags.extract")]);
    metrics::record_transition("queued", "running");
    metrics::task_runtime_s().record(1.5, &[KeyValue::new("state", "finished")]);
}

//! Worker runtime: claim tasks, run them in child processes, report back.
//!
//! One worker runs one task at a time. Shutdown (signal or stop file) is only
//! honored between tasks, so a claimed task is always finalized first.

pub mod backoff;
pub mod execution;
pub mod handler;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::control::ControlApi;
use crate::error::Result;
use crate::model::{ClaimFilter, Finalize, State, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

pub use backoff::Backoff;
pub use execution::{CANCELLED_TRAILER, TaskRun};
pub use handler::{HandlerRegistry, HandlerSpec};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Identity used when claiming; must be unique across live workers.
    pub name: String,
    /// Parent of the per-task scratch directories.
    pub work_dir: PathBuf,
    /// Sleep between claims when the queue has nothing for us.
    pub poll_interval: Duration,
    /// Heartbeat period while a task runs.
    pub update_interval: Duration,
    /// Capability labels advertised when claiming.
    pub labels: Vec<String>,
    /// The worker stops once this file exists.
    pub stop_file: Option<PathBuf>,
    pub claim_backoff: Backoff,
    pub finalize_backoff: Backoff,
    pub finalize_attempts: u32,
}

impl WorkerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work_dir: std::env::temp_dir().join("taskq-runs"),
            poll_interval: Duration::from_secs(10),
            update_interval: Duration::from_secs(20),
            labels: Vec::new(),
            stop_file: None,
            claim_backoff: Backoff::claim(),
            finalize_backoff: Backoff::finalize(),
            finalize_attempts: 3,
        }
    }
}

pub struct Worker {
    control: Arc<dyn ControlApi>,
    handlers: Arc<HandlerRegistry>,
    options: WorkerOptions,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        control: Arc<dyn ControlApi>,
        handlers: Arc<HandlerRegistry>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            control,
            handlers,
            options,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the worker to stop after the current task.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// The claim filter: every registered task type plus our labels.
    pub fn claim_filter(&self) -> ClaimFilter {
        ClaimFilter {
            task_types: self.handlers.task_types(),
            labels: self.options.labels.clone(),
        }
    }

    fn should_stop(&self) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            return true;
        }
        match &self.options.stop_file {
            Some(path) if path.exists() => {
                info!(stop_file = %path.display(), "stop file found");
                true
            }
            _ => false,
        }
    }

    /// Poll for work until shut down.
    ///
    /// Control API errors never end the loop; they only lengthen the wait
    /// before the next claim.
    pub async fn run(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.options.work_dir).await?;

        info!(
            worker = %self.options.name,
            task_types = ?self.handlers.task_types(),
            labels = ?self.options.labels,
            "worker started"
        );

        let mut failures: u32 = 0;
        loop {
            if self.should_stop() {
                info!(worker = %self.options.name, "worker stopping");
                return Ok(());
            }

            let wait = match self.run_once().await {
                Ok(true) => {
                    failures = 0;
                    None
                }
                Ok(false) => {
                    failures = 0;
                    Some(self.options.poll_interval)
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.options.claim_backoff.delay(failures);
                    warn!(
                        worker = %self.options.name,
                        error = %e,
                        failures,
                        retry_in_s = delay.as_secs_f64(),
                        "claim failed"
                    );
                    metrics::worker_control_errors().add(1, &[KeyValue::new("operation", "claim")]);
                    Some(delay)
                }
            };

            if let Some(delay) = wait {
                tokio::select! {
                    _ = self.shutdown.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Claim one task and see it through. Returns whether a task was run.
    pub async fn run_once(&self) -> Result<bool> {
        let filter = self.claim_filter();
        let Some(task) = self.control.claim(&self.options.name, &filter).await? else {
            return Ok(false);
        };
        self.process(task).await;
        Ok(true)
    }

    async fn process(&self, task: Task) {
        let span = start_task_span(&task.task_type, task.id);
        record_state_transition(&span, "claimed", task.state.as_str());

        async {
            let fin = self.execute(&task).await;
            if self.finalize_with_retry(&task, &fin).await {
                record_state_transition(&span, task.state.as_str(), fin.state.as_str());
            }
        }
        .instrument(span.clone())
        .await
    }

    /// Produce the terminal report for `task`. Every failure on the worker's
    /// side becomes an unsuccessful report rather than an error.
    async fn execute(&self, task: &Task) -> Finalize {
        if task.state == State::CancellationRequested {
            info!(id = %task.id, "task was cancelled before it could run here");
            return Finalize {
                log: format!("{}{CANCELLED_TRAILER}", task.log),
                state: State::Cancelled,
                success: false,
                result: json!({}),
                runtime: 0.0,
            };
        }

        let Some(handler) = self.handlers.get(&task.task_type) else {
            warn!(id = %task.id, task_type = %task.task_type, "no handler for task type");
            return failed(&task.log, format!("no handler for task type {}", task.task_type));
        };

        let run = match TaskRun::create(&self.options.work_dir, task).await {
            Ok(run) => run,
            Err(e) => return failed(&task.log, format!("cannot prepare task directory: {e}")),
        };

        let fin = match run
            .execute(self.control.as_ref(), handler, self.options.update_interval)
            .await
        {
            Ok(fin) => fin,
            Err(e) => {
                warn!(id = %task.id, error = %e, "supervising handler failed");
                failed(
                    &run.captured_log().await,
                    format!("supervising handler failed: {e}"),
                )
            }
        };

        if let Err(e) = run.cleanup().await {
            warn!(run_id = %run.id, error = %e, "cleanup error");
        }
        fin
    }

    /// Finalize with bounded retries on transient errors. Returns whether
    /// the Control API accepted the report.
    async fn finalize_with_retry(&self, task: &Task, fin: &Finalize) -> bool {
        let attempts = self.options.finalize_attempts.max(1);
        for attempt in 1..=attempts {
            match self.control.finalize(task.id, fin).await {
                Ok(stored) => {
                    info!(
                        id = %task.id,
                        state = %stored.state,
                        success = stored.success,
                        "task reported"
                    );
                    return true;
                }
                Err(e) => {
                    metrics::worker_control_errors()
                        .add(1, &[KeyValue::new("operation", "finalize")]);
                    if !e.is_transient() || attempt == attempts {
                        error!(
                            id = %task.id,
                            attempt,
                            error = %e,
                            "giving up on finalizing task"
                        );
                        return false;
                    }
                    let delay = self.options.finalize_backoff.delay(attempt);
                    warn!(
                        id = %task.id,
                        attempt,
                        error = %e,
                        retry_in_s = delay.as_secs_f64(),
                        "finalize failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        false
    }
}

/// An unsuccessful Finished report: `log` followed by `message`.
fn failed(log: &str, message: String) -> Finalize {
    Finalize {
        log: format!("{log}{message}\n"),
        state: State::Finished,
        success: false,
        result: json!({ "error": message }),
        runtime: 0.0,
    }
}

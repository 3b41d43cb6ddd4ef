//! One task's execution: scratch directory, child process, monitoring.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handler::HandlerSpec;
use crate::control::ControlApi;
use crate::error::{Error, Result};
use crate::model::{Finalize, State, Task, TaskId};
use crate::telemetry::metrics;
use crate::wire::TaskDetailed;

/// Appended to the final log of a task stopped by cancellation.
pub const CANCELLED_TRAILER: &str = "\n\n TASK WAS CANCELLED\n";

/// Scratch context for running one task.
///
/// Layout of `dir`:
/// - `task.json`: the claimed task
/// - `config.json`: its configuration alone
/// - `output.log`: combined stdout and stderr of the handler
/// - `result.json`: written by the handler, optional
pub struct TaskRun {
    pub id: Uuid,
    pub dir: PathBuf,
    task: Task,
}

impl TaskRun {
    /// Make the directory and write the input files.
    pub async fn create(base_dir: &Path, task: &Task) -> Result<Self> {
        let id = Uuid::new_v4();
        let dir = base_dir.join(id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let task_json = serde_json::to_string_pretty(&TaskDetailed::from(task))
            .map_err(|e| Error::Other(format!("serialize task: {e}")))?;
        tokio::fs::write(dir.join("task.json"), task_json).await?;

        let config_json = serde_json::to_string_pretty(&task.configuration)
            .map_err(|e| Error::Other(format!("serialize configuration: {e}")))?;
        tokio::fs::write(dir.join("config.json"), config_json).await?;

        debug!(run_id = %id, task_id = %task.id, dir = %dir.display(), "task run created");

        Ok(Self {
            id,
            dir,
            task: task.clone(),
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join("output.log")
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    fn spawn(&self, handler: &HandlerSpec) -> Result<Child> {
        let program = if handler.command.is_relative() && handler.command.components().count() > 1
        {
            std::env::current_dir()?.join(&handler.command)
        } else {
            handler.command.clone()
        };

        // Both streams share one file description, so their writes
        // interleave in the order the child makes them.
        let stdout = std::fs::File::create(self.output_path())?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&program);
        command
            .args(&handler.args)
            .envs(&handler.env)
            .current_dir(&self.dir)
            .env("TASKQ_TASK_ID", self.task.id.to_string())
            .env("TASKQ_TASK_TYPE", &self.task.task_type)
            .env("TASKQ_TASK_DIR", &self.dir)
            .env("TASKQ_CONFIG_PATH", self.dir.join("config.json"))
            .env("TASKQ_RESULT_PATH", self.result_path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        // Own process group: a Ctrl-C aimed at the worker must not reach the
        // handler, the worker finishes the task first.
        #[cfg(unix)]
        command.process_group(0);

        debug!(task_id = %self.task.id, program = %program.display(), "spawning handler");
        Ok(command.spawn()?)
    }

    /// Run the handler to completion or cancellation and build the terminal
    /// report. Handler failures end up in the report, not in `Err`.
    pub async fn execute(
        &self,
        control: &dyn ControlApi,
        handler: &HandlerSpec,
        update_interval: Duration,
    ) -> Result<Finalize> {
        let start = Instant::now();

        let mut child = match self.spawn(handler) {
            Ok(child) => child,
            Err(e) => {
                warn!(task_id = %self.task.id, error = %e, "handler failed to start");
                return Ok(Finalize {
                    log: format!(
                        "{}failed to start {}: {e}\n",
                        self.task.log,
                        handler.command.display()
                    ),
                    state: State::Finished,
                    success: false,
                    result: json!({ "error": format!("failed to start handler: {e}") }),
                    runtime: start.elapsed().as_secs_f64(),
                });
            }
        };
        info!(task_id = %self.task.id, pid = child.id(), "handler started");

        let mut tail = LogTail::open(&self.output_path()).await?;
        let mut cancelled = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::time::sleep(update_interval) => {}
            }

            tail.ship(control, self.task.id).await;

            match control.get(self.task.id).await {
                Ok(task) if task.state == State::CancellationRequested || task.state.is_terminal() => {
                    info!(task_id = %self.task.id, state = %task.state, "cancellation observed, stopping handler");
                    cancelled = true;
                    if let Err(e) = child.start_kill() {
                        warn!(task_id = %self.task.id, error = %e, "kill failed");
                    }
                    break child.wait().await?;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(task_id = %self.task.id, error = %e, "state poll failed");
                    metrics::worker_control_errors().add(1, &[KeyValue::new("operation", "get")]);
                }
            }
        };

        let runtime = start.elapsed().as_secs_f64();
        let exit_code = status.code().unwrap_or(-1);

        // Re-read everything so the final log is complete even when the
        // last tick's append failed or never ran.
        let mut log = self.captured_log().await;

        let (state, success, result) = if cancelled {
            log.push_str(CANCELLED_TRAILER);
            (State::Cancelled, false, json!({ "exit_code": exit_code }))
        } else if status.success() {
            let (success, result) = self.read_result().await;
            (State::Finished, success, result)
        } else {
            (State::Finished, false, json!({ "exit_code": exit_code }))
        };

        info!(
            task_id = %self.task.id,
            exit_code,
            cancelled,
            runtime,
            "handler exited"
        );

        Ok(Finalize {
            log,
            state,
            success,
            result,
            runtime,
        })
    }

    /// The log held at claim time followed by everything the handler wrote
    /// to `output.log` so far.
    ///
    /// A reattached task already carries output from an earlier run; it
    /// stays at the front. A missing or unreadable `output.log` adds nothing.
    pub async fn captured_log(&self) -> String {
        match tokio::fs::read(self.output_path()).await {
            Ok(bytes) => format!("{}{}", self.task.log, String::from_utf8_lossy(&bytes)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(task_id = %self.task.id, error = %e, "reading handler output failed");
                }
                self.task.log.clone()
            }
        }
    }

    /// Result of a handler that exited 0.
    ///
    /// An object is used as is, any other JSON value is wrapped as
    /// `{"result": value}`, and no file at all means `{}`.
    async fn read_result(&self) -> (bool, serde_json::Value) {
        let content = match tokio::fs::read_to_string(self.result_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (true, json!({})),
            Err(e) => return (false, json!({ "error": format!("cannot read result.json: {e}") })),
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value @ serde_json::Value::Object(_)) => (true, value),
            Ok(value) => (true, json!({ "result": value })),
            Err(e) => (false, json!({ "error": format!("invalid result.json: {e}") })),
        }
    }

    /// Remove the scratch directory.
    pub async fn cleanup(&self) -> Result<()> {
        tokio::fs::remove_dir_all(&self.dir).await?;
        debug!(run_id = %self.id, "task run cleaned up");
        Ok(())
    }
}

/// Incremental reader over `output.log`.
///
/// Bytes read but not yet accepted by the Control API stay in `pending` and
/// go out with the next tick.
struct LogTail {
    file: tokio::fs::File,
    pending: Vec<u8>,
}

impl LogTail {
    async fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: tokio::fs::File::open(path).await?,
            pending: Vec::new(),
        })
    }

    async fn ship(&mut self, control: &dyn ControlApi, id: TaskId) {
        if let Err(e) = self.file.read_to_end(&mut self.pending).await {
            warn!(task_id = %id, error = %e, "reading handler output failed");
        }

        let (text, consumed) = split_complete(&self.pending);
        if text.is_empty() {
            return;
        }

        match control.patch_log(id, &text).await {
            Ok(_) => {
                self.pending.drain(..consumed);
            }
            Err(e) => {
                warn!(
                    task_id = %id,
                    error = %e,
                    pending_bytes = self.pending.len(),
                    "log append failed, retrying next tick"
                );
                metrics::worker_control_errors().add(1, &[KeyValue::new("operation", "patch_log")]);
            }
        }
    }
}

/// Decode the longest prefix of `bytes` that does not end inside a UTF-8
/// sequence. Invalid bytes elsewhere become U+FFFD. Returns the text and the
/// number of bytes it covers.
fn split_complete(bytes: &[u8]) -> (String, usize) {
    let mut text = String::with_capacity(bytes.len());
    let mut consumed = 0;

    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        consumed += chunk.valid().len();

        let invalid = chunk.invalid();
        if invalid.is_empty() {
            continue;
        }
        let at_end = consumed + invalid.len() == bytes.len();
        let incomplete = std::str::from_utf8(invalid).is_err_and(|e| e.error_len().is_none());
        if at_end && incomplete {
            break;
        }
        text.push(char::REPLACEMENT_CHARACTER);
        consumed += invalid.len();
    }

    (text, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_a_split_multibyte_char() {
        let snowman = "☃".as_bytes();
        let mut bytes = b"ab".to_vec();
        bytes.extend_from_slice(&snowman[..2]);

        let (text, consumed) = split_complete(&bytes);
        assert_eq!(text, "ab");
        assert_eq!(consumed, 2);

        bytes.extend_from_slice(&snowman[2..]);
        let (text, consumed) = split_complete(&bytes);
        assert_eq!(text, "ab☃");
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn invalid_bytes_in_the_middle_are_replaced() {
        let bytes = b"a\xffb";
        let (text, consumed) = split_complete(bytes);
        assert_eq!(text, "a\u{FFFD}b");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn empty_input() {
        assert_eq!(split_complete(b""), (String::new(), 0));
    }

    #[tokio::test]
    async fn captured_log_follows_the_claimed_log() {
        let base = tempfile::tempdir().unwrap();
        let mut task = crate::store::memory::sample_task(TaskId(3), "demo.echo");
        task.log = "from before\n".to_string();
        let run = TaskRun::create(base.path(), &task).await.unwrap();

        // Nothing spawned yet, so no output.log.
        assert_eq!(run.captured_log().await, "from before\n");

        tokio::fs::write(run.output_path(), b"partial \xff output")
            .await
            .unwrap();
        assert_eq!(
            run.captured_log().await,
            "from before\npartial \u{FFFD} output"
        );
    }
}

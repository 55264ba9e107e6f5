//! Concrete [`WorkerDispatcher`] used by `gator run`/`gator resume`.
//!
//! The spawn/lifecycle mechanics of a worker are out of scope for the core
//! (it only needs an opaque future that resolves to a sentinel); this
//! implementation spawns a configured command per task and polls the task's
//! working directory for `.task-complete.json`, mirroring the reference
//! orchestrator's subprocess-harness pattern without reproducing its
//! streaming JSONL protocol.

use std::path::PathBuf;
use std::time::Duration;

use gator_core::coordinator::{WorkerDispatcher, WorkerFuture};
use gator_core::sentinel::{self, TaskSentinel};
use gator_db::models::QueuedTask;
use tokio::process::Command;

pub struct SubprocessDispatcher {
    command: Vec<String>,
    work_root: PathBuf,
    poll_interval: Duration,
}

impl SubprocessDispatcher {
    pub fn new(command: Vec<String>, work_root: PathBuf, poll_interval: Duration) -> Self {
        Self {
            command,
            work_root,
            poll_interval,
        }
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.work_root.join(task_id)
    }
}

impl WorkerDispatcher for SubprocessDispatcher {
    fn dispatch(&self, task: QueuedTask, worker_id: String) -> WorkerFuture {
        let task_id = task.id().to_owned();
        let task_dir = self.task_dir(&task_id);
        let command = self.command.clone();
        let poll_interval = self.poll_interval;

        Box::pin(async move {
            if let Err(e) = tokio::fs::create_dir_all(&task_dir).await {
                tracing::warn!(task_id = %task_id, error = %e, "failed to create task working directory");
                return failed_sentinel(&task_id, &format!("could not create working directory: {e}"));
            }

            let Some((program, args)) = command.split_first() else {
                return failed_sentinel(&task_id, "no worker_command configured");
            };

            let spawn_result = Command::new(program)
                .args(args)
                .current_dir(&task_dir)
                .env("GATOR_TASK_ID", &task_id)
                .env("GATOR_WORKER_ID", &worker_id)
                .env("GATOR_TASK_DIR", &task_dir)
                .spawn();

            let mut child = match spawn_result {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "failed to spawn worker process");
                    return failed_sentinel(&task_id, &format!("failed to spawn worker: {e}"));
                }
            };

            let sentinel_path = task_dir.join(sentinel::TASK_COMPLETE_FILE);
            loop {
                if sentinel_path.exists() {
                    break;
                }
                if let Ok(Some(status)) = child.try_wait() {
                    if !sentinel_path.exists() {
                        return failed_sentinel(
                            &task_id,
                            &format!("worker exited ({status}) without writing a completion sentinel"),
                        );
                    }
                    break;
                }
                tokio::time::sleep(poll_interval).await;
            }

            match TaskSentinel::read_from(&sentinel_path) {
                Ok(sentinel) => sentinel,
                Err(e) => failed_sentinel(&task_id, &format!("{e}")),
            }
        })
    }
}

fn failed_sentinel(task_id: &str, reason: &str) -> TaskSentinel {
    let json = serde_json::json!({
        "task_id": task_id,
        "status": "failed",
        "notes": reason,
    });
    TaskSentinel::parse(&json.to_string()).expect("hand-built sentinel is always well-formed")
}

// src/exec/task_runner.rs

//! Runs one attempt of a task on this host.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::app::AppKind;
use crate::dag::DispatchedTask;
use crate::errors::TaskError;
use crate::exec::staging::{parse_result_value, stage_local_outputs};
use crate::future::{AppValue, Outcome};
use crate::types::Value;

/// Where an attempt runs and where its outputs are staged.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub workdir: PathBuf,
    pub run_dir: PathBuf,
}

/// How an attempt ended before staging.
enum Finished {
    Value(Value),
    Failed(TaskError),
}

/// Run a single attempt, honouring its walltime and the cancel channel.
///
/// - If the cancel channel fires, a running child process is killed and the
///   outcome is `Cancelled`.
/// - Declared outputs are staged only after a successful run.
/// - A native body cannot be interrupted. It keeps a clone of `slot` until
///   it actually returns, even when the attempt already timed out or was
///   cancelled.
pub async fn run_task<S>(
    task: &DispatchedTask,
    paths: &RunPaths,
    cancel_rx: &mut oneshot::Receiver<()>,
    slot: &Arc<S>,
) -> Outcome
where
    S: Send + Sync + 'static,
{
    info!(
        task_id = task.task_id,
        app = %task.name,
        attempt = task.attempt,
        "starting task"
    );

    let run = run_with_walltime(task, &paths.workdir, task.walltime, slot);

    let finished = tokio::select! {
        finished = run => finished,
        Ok(()) = &mut *cancel_rx => {
            info!(task_id = task.task_id, attempt = task.attempt, "cancellation requested; stopping task");
            // Dropping `run` kills the child (kill_on_drop).
            return Err(TaskError::Cancelled { task: task.task_id });
        }
    };

    match finished {
        Finished::Failed(e) => Err(e),
        Finished::Value(value) => {
            let outputs = stage_local_outputs(task, &paths.workdir, &paths.run_dir).await?;
            Ok(AppValue::with_outputs(value, outputs))
        }
    }
}

async fn run_with_walltime<S>(
    task: &DispatchedTask,
    workdir: &Path,
    walltime: Option<Duration>,
    slot: &Arc<S>,
) -> Finished
where
    S: Send + Sync + 'static,
{
    let body = run_body(task, workdir, slot);
    match walltime {
        None => body.await,
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(finished) => finished,
            Err(_) => {
                warn!(task_id = task.task_id, ?limit, "task exceeded walltime");
                Finished::Failed(TaskError::JobTimeout {
                    task: task.task_id,
                    job: None,
                    walltime: limit,
                })
            }
        },
    }
}

async fn run_body<S>(task: &DispatchedTask, workdir: &Path, slot: &Arc<S>) -> Finished
where
    S: Send + Sync + 'static,
{
    match &task.app.kind {
        AppKind::Shell { .. } => run_shell(task, workdir).await,
        AppKind::Native(f) => {
            let f = f.clone();
            let args = task.args.clone();
            let slot = slot.clone();
            let body = move || {
                let _slot = slot;
                f(&args)
            };
            match tokio::task::spawn_blocking(body).await {
                Ok(Ok(value)) => Finished::Value(value),
                Ok(Err(e)) => Finished::Failed(TaskError::execution(task.task_id, format!("{e:#}"))),
                Err(join) => Finished::Failed(TaskError::execution(
                    task.task_id,
                    format!("app panicked: {join}"),
                )),
            }
        }
    }
}

async fn run_shell(task: &DispatchedTask, workdir: &Path) -> Finished {
    let cmd_line = match task.app.render_command(&task.args) {
        Ok(c) => c,
        Err(msg) => return Finished::Failed(TaskError::execution(task.task_id, msg)),
    };

    debug!(task_id = task.task_id, cmd = %cmd_line, "spawning shell command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&cmd_line)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return Finished::Failed(TaskError::execution(
                task.task_id,
                format!("spawning process for '{}': {e}", task.name),
            ));
        }
    };

    let output = match child.wait_with_output().await {
        Ok(o) => o,
        Err(e) => {
            return Finished::Failed(TaskError::execution(
                task.task_id,
                format!("waiting for process of '{}': {e}", task.name),
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    capture(task, workdir, task.app.stdout.as_deref(), &stdout).await;
    capture(task, workdir, task.app.stderr.as_deref(), &stderr).await;

    let code = output.status.code();
    info!(
        task_id = task.task_id,
        exit_code = code.unwrap_or(-1),
        success = output.status.success(),
        "task process exited"
    );

    if output.status.success() {
        Finished::Value(parse_result_value(&stdout))
    } else {
        Finished::Failed(TaskError::ExecutionFailed {
            task: task.task_id,
            message: failure_message(code, &stderr),
            exit_code: code,
        })
    }
}

/// Last few stderr lines, which is where shells put the interesting part.
fn failure_message(code: Option<i32>, stderr: &str) -> String {
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    match code {
        Some(c) if tail.is_empty() => format!("exited with status {c}"),
        Some(c) => format!("exited with status {c}: {}", tail.join("\n")),
        None => "terminated by signal".to_string(),
    }
}

async fn capture(task: &DispatchedTask, workdir: &Path, target: Option<&Path>, contents: &str) {
    let Some(target) = target else {
        return;
    };
    let path = workdir.join(target);
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    if let Err(e) = tokio::fs::write(&path, contents).await {
        warn!(task_id = task.task_id, path = %path.display(), error = %e, "could not write captured output");
    }
}

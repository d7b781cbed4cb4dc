// src/exec/staging.rs

//! Moving declared outputs into the run directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::Channel;
use crate::dag::DispatchedTask;
use crate::errors::TaskError;
use crate::rundir::outputs_dir;
use crate::types::Value;

fn staging_error(task: &DispatchedTask, output: &str, reason: impl Into<String>) -> TaskError {
    TaskError::OutputStagingFailed {
        task: task.task_id,
        output: output.to_string(),
        reason: reason.into(),
    }
}

/// Copy every declared output from `workdir` into the task's output
/// directory. Returns the staged paths in declaration order.
pub async fn stage_local_outputs(
    task: &DispatchedTask,
    workdir: &Path,
    run_dir: &Path,
) -> Result<Vec<PathBuf>, TaskError> {
    let dest_dir = outputs_dir(run_dir, task.task_id);
    let mut staged = Vec::with_capacity(task.app.outputs.len());

    for output in &task.app.outputs {
        let src = workdir.join(output);
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Err(staging_error(
                task,
                output,
                format!("{} does not exist", src.display()),
            ));
        }

        let dest = dest_dir.join(output);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| staging_error(task, output, e.to_string()))?;
        }
        tokio::fs::copy(&src, &dest)
            .await
            .map_err(|e| staging_error(task, output, e.to_string()))?;

        debug!(task_id = task.task_id, output = %output, dest = %dest.display(), "staged output");
        staged.push(absolute(dest));
    }
    Ok(staged)
}

/// Pull every declared output from `remote_workdir` through `channel`.
pub async fn stage_remote_outputs(
    task: &DispatchedTask,
    channel: &dyn Channel,
    remote_workdir: &Path,
    run_dir: &Path,
) -> Result<Vec<PathBuf>, TaskError> {
    let dest_dir = outputs_dir(run_dir, task.task_id);
    let mut staged = Vec::with_capacity(task.app.outputs.len());

    for output in &task.app.outputs {
        let dest = dest_dir.join(output);
        channel
            .pull_file(&remote_workdir.join(output), &dest)
            .await
            .map_err(|e| staging_error(task, output, e.to_string()))?;

        debug!(task_id = task.task_id, output = %output, "pulled output");
        staged.push(absolute(dest));
    }
    Ok(staged)
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// Interpret a command's stdout as the app's result value: JSON if it
/// parses, the trimmed text otherwise, `null` when empty.
pub fn parse_result_value(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

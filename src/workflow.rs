// src/workflow.rs

//! Run the task graph of a config file on a kernel.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

use crate::app::{ArgValue, Args};
use crate::config::{build_app, ArgRef, KernelConfig, TaskSpec};
use crate::errors::{KernelError, Result, TaskError};
use crate::future::{AppFuture, AppValue, Outcome};
use crate::kernel::DataFlowKernel;
use crate::types::TaskId;

/// Final outcome of one configured task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub task_id: TaskId,
    pub outcome: Outcome,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(AppValue { value, outputs }) => {
                write!(f, "{} (task {}): ok {}", self.name, self.task_id, value)?;
                for path in outputs {
                    write!(f, " {}", path.display())?;
                }
                Ok(())
            }
            Err(e) => write!(f, "{} (task {}): failed: {}", self.name, self.task_id, e),
        }
    }
}

/// Results of every task, in submission order.
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    pub results: Vec<TaskResult>,
}

impl WorkflowReport {
    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn get(&self, name: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Submit every configured task (dependencies first) and wait for all of
/// them.
pub fn submit_all(
    kernel: &DataFlowKernel,
    config: &KernelConfig,
) -> Result<Vec<(String, AppFuture)>> {
    let mut futures: HashMap<&str, AppFuture> = HashMap::new();
    let mut submitted = Vec::new();

    for name in config.topological_order() {
        let task = config
            .tasks
            .get(name)
            .ok_or_else(|| KernelError::ConfigError(format!("unknown task '{name}'")))?;
        let args = task_args(task, &futures)?;
        let future = kernel.submit(&build_app(task), args);
        debug!(task = %name, task_id = future.task_id(), "submitted configured task");

        futures.insert(name.as_str(), future.clone());
        submitted.push((name.clone(), future));
    }
    Ok(submitted)
}

pub async fn run_workflow(kernel: &DataFlowKernel, config: &KernelConfig) -> Result<WorkflowReport> {
    let submitted = submit_all(kernel, config)?;
    info!(tasks = submitted.len(), "workflow submitted");

    let mut report = WorkflowReport::default();
    for (name, future) in submitted {
        let outcome = future.outcome().await;
        report.results.push(TaskResult {
            name,
            task_id: future.task_id(),
            outcome,
        });
    }
    Ok(report)
}

fn task_args(task: &TaskSpec, futures: &HashMap<&str, AppFuture>) -> Result<Args> {
    let mut args = Args::new();
    for (key, arg) in &task.args {
        args = args.kwarg(key, arg_value(arg, futures)?);
    }
    for arg in &task.inputs {
        args = args.input(arg_value(arg, futures)?);
    }
    for dep in &task.after {
        args = args.after(upstream(dep, futures)?);
    }
    Ok(args)
}

fn arg_value(arg: &ArgRef, futures: &HashMap<&str, AppFuture>) -> Result<ArgValue> {
    match arg {
        ArgRef::Value(v) => Ok(ArgValue::Value(v.clone())),
        ArgRef::Task(task) => Ok(ArgValue::Future(upstream(task, futures)?.clone())),
        ArgRef::Output { task, file } => {
            let future = upstream(task, futures)?;
            future
                .outputs()
                .into_iter()
                .find(|d| d.filename() == file)
                .map(ArgValue::Data)
                .ok_or_else(|| {
                    KernelError::Task(TaskError::OutputStagingFailed {
                        task: future.task_id(),
                        output: file.clone(),
                        reason: "output is not declared".to_string(),
                    })
                })
        }
    }
}

fn upstream<'a>(name: &str, futures: &'a HashMap<&str, AppFuture>) -> Result<&'a AppFuture> {
    futures.get(name).ok_or_else(|| {
        KernelError::ConfigError(format!("task '{name}' referenced before it was submitted"))
    })
}

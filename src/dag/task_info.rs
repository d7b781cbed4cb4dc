// src/dag/task_info.rs

//! Task records and the views derived from them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::app::{AppDescriptor, ArgValue, Args, ResolvedArgs};
use crate::errors::TaskError;
use crate::future::AppFuture;
use crate::types::{TaskId, Value};

/// Lifecycle of a submitted task.
///
/// `Pending → Ready → Dispatched → Running → {Completed | Failed | Retrying}`,
/// with `Retrying` leading back to `Dispatched`. `DepFailed` and `Cancelled`
/// are terminal states reached without (further) execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting on unsettled dependencies.
    Pending,
    /// All dependencies resolved; about to be handed to an executor.
    Ready,
    /// Handed to an executor, not yet reported as started.
    Dispatched,
    Running,
    /// Failed an attempt; waiting for the retry delay before re-dispatch.
    Retrying,
    Completed,
    Failed,
    DepFailed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::DepFailed | TaskState::Cancelled
        )
    }

    /// Currently owned by an executor.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskState::Dispatched | TaskState::Running)
    }

    /// Not terminal and not owned by an executor.
    pub fn is_undispatched(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Ready | TaskState::Retrying
        )
    }
}

/// Identifies one attempt of one task on an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecHandle {
    pub task_id: TaskId,
    pub attempt: u32,
}

impl fmt::Display for ExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}.{}", self.task_id, self.attempt)
    }
}

/// Kernel-side record of one submitted app invocation.
#[derive(Debug)]
pub struct TaskNode {
    pub id: TaskId,
    pub app: Arc<AppDescriptor>,
    pub args: Args,
    pub future: AppFuture,
    /// Distinct tasks whose futures this invocation waits on.
    pub deps: Vec<TaskId>,

    pub(crate) state: TaskState,
    /// Dependencies not yet settled.
    pub(crate) unmet: usize,
    pub(crate) executor: Option<String>,
    /// Number of dispatches made so far.
    pub(crate) attempts: u32,
    pub(crate) retry_budget: u32,
    pub(crate) last_error: Option<TaskError>,
}

impl TaskNode {
    pub fn new(id: TaskId, app: Arc<AppDescriptor>, args: Args, future: AppFuture) -> Self {
        let deps: Vec<TaskId> = args.dependencies().iter().map(|f| f.task_id()).collect();
        let unmet = deps.len();
        Self {
            id,
            app,
            args,
            future,
            deps,
            state: TaskState::Pending,
            unmet,
            executor: None,
            attempts: 0,
            retry_budget: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    /// Replace every future argument by its value.
    ///
    /// Only valid once every dependency has resolved successfully.
    pub fn resolve_args(&self) -> Result<ResolvedArgs, String> {
        let positional = self
            .args
            .positional
            .iter()
            .map(resolve_slot)
            .collect::<Result<Vec<_>, _>>()?;

        let mut keyword = std::collections::BTreeMap::new();
        for (name, slot) in &self.args.keyword {
            keyword.insert(name.clone(), resolve_slot(slot)?);
        }

        let inputs = self
            .args
            .inputs
            .iter()
            .map(resolve_slot)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedArgs {
            positional,
            keyword,
            inputs,
        })
    }
}

fn resolve_slot(slot: &ArgValue) -> Result<Value, String> {
    match slot {
        ArgValue::Value(v) => Ok(v.clone()),
        ArgValue::Future(f) => match f.try_outcome() {
            Some(Ok(v)) => Ok(v.value),
            Some(Err(e)) => Err(format!("argument from task {} failed: {e}", f.task_id())),
            None => Err(format!("argument from task {} is not ready", f.task_id())),
        },
        ArgValue::Data(d) => match d.try_path() {
            Some(Ok(path)) => Ok(Value::String(path.to_string_lossy().into_owned())),
            Some(Err(e)) => Err(format!("input file '{}' unavailable: {e}", d.filename())),
            None => Err(format!("input file '{}' is not ready", d.filename())),
        },
    }
}

/// A task the scheduler wants an executor to run now.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub task_id: TaskId,
    pub name: String,
    pub app: Arc<AppDescriptor>,
    pub args: ResolvedArgs,
    /// 1-based attempt number; a retry gets a fresh number.
    pub attempt: u32,
    pub executor: String,
    pub walltime: Option<Duration>,
}

impl DispatchedTask {
    pub fn handle(&self) -> ExecHandle {
        ExecHandle {
            task_id: self.task_id,
            attempt: self.attempt,
        }
    }
}

/// Read-only view of a task for inspection.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub executor: Option<String>,
    pub attempts: u32,
    pub dependencies: Vec<TaskId>,
    pub dependents: Vec<TaskId>,
    /// Terminal error, for tasks that did not complete.
    pub error: Option<TaskError>,
}

/// Number of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub ready: usize,
    pub dispatched: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub dep_failed: usize,
    pub cancelled: usize,
}

impl StatusSummary {
    pub fn record(&mut self, state: TaskState) {
        let slot = match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Ready => &mut self.ready,
            TaskState::Dispatched => &mut self.dispatched,
            TaskState::Running => &mut self.running,
            TaskState::Retrying => &mut self.retrying,
            TaskState::Completed => &mut self.completed,
            TaskState::Failed => &mut self.failed,
            TaskState::DepFailed => &mut self.dep_failed,
            TaskState::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.ready
            + self.dispatched
            + self.running
            + self.retrying
            + self.completed
            + self.failed
            + self.dep_failed
            + self.cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.dispatched + self.running
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pending:{} Ready:{} Dispatched:{} Running:{} Retrying:{} Done:{} Failed:{} DepFailed:{} Cancelled:{}",
            self.pending,
            self.ready,
            self.dispatched,
            self.running,
            self.retrying,
            self.completed,
            self.failed,
            self.dep_failed,
            self.cancelled
        )
    }
}

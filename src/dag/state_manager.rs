// src/dag/state_manager.rs

//! State transitions shared by the scheduler's event handlers.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::dag::scheduler_step::{SchedulerStep, Settlement};
use crate::dag::task_info::{DispatchedTask, TaskNode, TaskState};
use crate::errors::TaskError;
use crate::future::AppValue;
use crate::types::{ExecutorHint, TaskId};

/// Maps an [`ExecutorHint`] to a concrete executor name.
#[derive(Debug, Clone, Default)]
pub struct ExecutorSelector {
    names: BTreeSet<String>,
    default: Option<String>,
}

impl ExecutorSelector {
    pub fn new<I>(names: I, default: Option<String>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            names: names.into_iter().collect(),
            default,
        }
    }

    pub fn knows(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Pick the executor for one dispatch.
    ///
    /// `AnyOf` chooses uniformly among the listed executors that exist.
    /// `Default` uses the configured default, or the only executor if there
    /// is exactly one.
    pub fn select(&self, hint: &ExecutorHint) -> Result<String, String> {
        match hint {
            ExecutorHint::Named(name) => {
                if self.knows(name) {
                    Ok(name.clone())
                } else {
                    Err(format!("unknown executor '{name}'"))
                }
            }
            ExecutorHint::AnyOf(names) => {
                let known: Vec<&String> = names.iter().filter(|n| self.knows(n)).collect();
                if known.is_empty() {
                    return Err(format!("none of the executors {names:?} exist"));
                }
                Ok(known[fastrand::usize(..known.len())].clone())
            }
            ExecutorHint::Default => match &self.default {
                Some(name) => Ok(name.clone()),
                None if self.names.len() == 1 => {
                    Ok(self.names.iter().next().cloned().unwrap_or_default())
                }
                None => Err("no default executor configured".to_string()),
            },
        }
    }
}

/// Applies task transitions and records their side effects in a step.
pub struct StateManager<'a> {
    tasks: &'a mut HashMap<TaskId, TaskNode>,
    selector: &'a ExecutorSelector,
    draining: bool,
    aborted_by: Option<TaskId>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        tasks: &'a mut HashMap<TaskId, TaskNode>,
        selector: &'a ExecutorSelector,
        draining: bool,
        aborted_by: Option<TaskId>,
    ) -> Self {
        Self {
            tasks,
            selector,
            draining,
            aborted_by,
        }
    }

    /// Hand a `Ready` or `Retrying` task to an executor.
    ///
    /// Failing to pick an executor or to resolve the arguments fails the task
    /// outright; neither is something a retry would fix.
    pub fn dispatch(&mut self, id: TaskId, step: &mut SchedulerStep) {
        let Some(node) = self.tasks.get(&id) else {
            warn!(task_id = id, "dispatch requested for unknown task");
            return;
        };
        if !matches!(node.state, TaskState::Ready | TaskState::Retrying) {
            debug!(task_id = id, state = ?node.state, "not dispatchable, skipping");
            return;
        }

        if self.draining {
            let error = drain_error(self.aborted_by, id);
            self.finish(id, TaskState::Failed, Err(error), step);
            return;
        }

        let executor = match self.selector.select(&node.app.executor) {
            Ok(name) => name,
            Err(msg) => {
                self.finish(id, TaskState::Failed, Err(TaskError::execution(id, msg)), step);
                return;
            }
        };

        let args = match node.resolve_args() {
            Ok(args) => args,
            Err(msg) => {
                self.finish(id, TaskState::Failed, Err(TaskError::execution(id, msg)), step);
                return;
            }
        };

        let Some(node) = self.tasks.get_mut(&id) else {
            return;
        };
        node.attempts += 1;
        node.state = TaskState::Dispatched;
        node.executor = Some(executor.clone());

        debug!(
            task_id = id,
            app = %node.app.name,
            executor = %executor,
            attempt = node.attempts,
            "dispatching task"
        );

        step.newly_dispatched.push(DispatchedTask {
            task_id: id,
            name: node.app.name.clone(),
            app: node.app.clone(),
            args,
            attempt: node.attempts,
            executor,
            walltime: node.app.walltime,
        });
    }

    /// Move a task into a terminal state and queue its settlement.
    pub fn finish(
        &mut self,
        id: TaskId,
        state: TaskState,
        outcome: Result<AppValue, TaskError>,
        step: &mut SchedulerStep,
    ) {
        let Some(node) = self.tasks.get_mut(&id) else {
            warn!(task_id = id, "cannot finish unknown task");
            return;
        };
        if node.state.is_terminal() {
            debug!(task_id = id, state = ?node.state, "task already terminal");
            return;
        }

        node.state = state;
        if let Err(e) = &outcome {
            node.last_error = Some(e.clone());
        }

        step.settlements.push(Settlement {
            future: node.future.clone(),
            outcome,
        });
    }

    /// Ids of tasks matching `pred`, in submission order.
    pub fn collect<F>(&self, pred: F) -> Vec<TaskId>
    where
        F: Fn(&TaskNode) -> bool,
    {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|n| pred(n))
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Error for a task that can no longer run because the kernel is draining:
/// `RunAborted` after a fail-fast abort, `KernelShutdown` otherwise.
pub(crate) fn drain_error(aborted_by: Option<TaskId>, task: TaskId) -> TaskError {
    match aborted_by {
        Some(failed) => TaskError::RunAborted { task, failed },
        None => TaskError::KernelShutdown { task },
    }
}

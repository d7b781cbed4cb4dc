// src/dag/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::{RemoteCancel, SchedulerStep};
use crate::dag::state_manager::{drain_error, ExecutorSelector, StateManager};
use crate::dag::task_info::{ExecHandle, StatusSummary, TaskNode, TaskSnapshot, TaskState};
use crate::errors::TaskError;
use crate::future::Outcome;
use crate::retry::RetryPolicy;
use crate::types::TaskId;

/// Scheduler holds the task graph plus the lifecycle of every task.
///
/// It is responsible for:
/// - tracking how many dependencies of each task are still unsettled
/// - dispatching tasks once their inputs resolved
/// - applying the retry policy to failed attempts
/// - ignoring completions for stale attempts
/// - cancellation and shutdown draining
/// - aborting the whole run on the first terminal failure, when fail-fast
///
/// It never touches executors or futures directly: every side effect is
/// returned in a [`SchedulerStep`].
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    tasks: HashMap<TaskId, TaskNode>,
    selector: ExecutorSelector,
    retry: RetryPolicy,
    /// Set once shutdown began; nothing new is dispatched afterwards.
    draining: bool,
    fail_fast: bool,
    /// Task whose failure aborted the run.
    aborted_by: Option<TaskId>,
}

impl Scheduler {
    pub fn new(selector: ExecutorSelector, retry: RetryPolicy) -> Self {
        Self {
            graph: DagGraph::new(),
            tasks: HashMap::new(),
            selector,
            retry,
            draining: false,
            fail_fast: false,
            aborted_by: None,
        }
    }

    /// Abort the run on the first task that fails terminally: everything not
    /// yet finished fails with `RunAborted`.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Task whose failure aborted the run, if any.
    pub fn aborted_by(&self) -> Option<TaskId> {
        self.aborted_by
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|n| n.state)
    }

    /// Add a freshly submitted task. Tasks without dependencies are
    /// dispatched in the same step.
    pub fn register(&mut self, mut node: TaskNode) -> SchedulerStep {
        let mut step = SchedulerStep::empty();
        let id = node.id;

        if self.tasks.contains_key(&id) {
            warn!(task_id = id, "task registered twice, ignoring");
            return step;
        }

        node.retry_budget = self.retry.budget(node.app.retries);
        self.graph.add_task(id, &node.deps);

        debug!(
            task_id = id,
            app = %node.app.name,
            deps = ?node.deps,
            "task registered"
        );

        let ready = node.unmet == 0;
        self.tasks.insert(id, node);

        if self.draining {
            let error = drain_error(self.aborted_by, id);
            self.manager()
                .finish(id, TaskState::Failed, Err(error), &mut step);
        } else if ready {
            self.make_ready(id, &mut step);
        }
        step
    }

    /// One dependency of `task` settled.
    ///
    /// A failed dependency short-circuits the task to `DepFailed`; its own
    /// future failing then collapses everything further downstream.
    pub fn dependency_settled(
        &mut self,
        task: TaskId,
        dependency: TaskId,
        result: Result<(), TaskError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::empty();

        let Some(node) = self.tasks.get_mut(&task) else {
            warn!(task_id = task, dependency, "dependency settled for unknown task");
            return step;
        };
        if node.state != TaskState::Pending {
            debug!(
                task_id = task,
                dependency,
                state = ?node.state,
                "dependency settled after task left Pending"
            );
            return step;
        }

        match result {
            Err(cause) => {
                let downstream = self.graph.downstream_of(task).len();
                info!(
                    task_id = task,
                    dependency,
                    cause = %cause.kind(),
                    downstream,
                    "dependency failed; task will not run"
                );
                let error = TaskError::DependencyFailed {
                    task,
                    dependency,
                    cause: Arc::new(cause),
                };
                self.manager()
                    .finish(task, TaskState::DepFailed, Err(error), &mut step);
            }
            Ok(()) => {
                node.unmet = node.unmet.saturating_sub(1);
                if node.unmet == 0 {
                    self.make_ready(task, &mut step);
                }
            }
        }
        step
    }

    /// An executor reported that `handle` started running.
    pub fn task_started(&mut self, handle: ExecHandle) {
        let Some(node) = self.tasks.get_mut(&handle.task_id) else {
            return;
        };
        if node.attempts == handle.attempt && node.state == TaskState::Dispatched {
            node.state = TaskState::Running;
            debug!(task_id = handle.task_id, attempt = handle.attempt, "task running");
        }
    }

    /// An executor reported the outcome of `handle`.
    pub fn task_completed(&mut self, handle: ExecHandle, outcome: Outcome) -> SchedulerStep {
        let mut step = SchedulerStep::empty();
        let id = handle.task_id;

        let Some(node) = self.tasks.get_mut(&id) else {
            warn!(task_id = id, "completion for unknown task");
            return step;
        };
        if node.attempts != handle.attempt || !node.state.is_in_flight() {
            debug!(
                task_id = id,
                attempt = handle.attempt,
                current_attempt = node.attempts,
                state = ?node.state,
                "ignoring stale completion"
            );
            return step;
        }

        match outcome {
            Ok(value) => {
                info!(task_id = id, app = %node.app.name, attempt = handle.attempt, "task completed");
                self.manager()
                    .finish(id, TaskState::Completed, Ok(value), &mut step);
            }
            Err(error) => {
                let retries_used = node.attempts.saturating_sub(1);
                let can_retry =
                    error.is_retryable() && !self.draining && retries_used < node.retry_budget;

                if can_retry {
                    warn!(
                        task_id = id,
                        attempt = handle.attempt,
                        budget = node.retry_budget,
                        error = %error,
                        "task attempt failed; retrying"
                    );
                    node.state = TaskState::Retrying;
                    node.last_error = Some(error);

                    let delay = self.retry.delay_after(node.attempts);
                    if delay.is_zero() {
                        self.manager().dispatch(id, &mut step);
                    } else {
                        step.delayed_retries.push((id, delay));
                    }
                } else {
                    warn!(
                        task_id = id,
                        attempt = handle.attempt,
                        error = %error,
                        "task failed"
                    );
                    self.manager()
                        .finish(id, TaskState::Failed, Err(error), &mut step);
                    if self.fail_fast && !self.draining {
                        self.abort(id, &mut step);
                    }
                }
            }
        }
        step
    }

    /// Fail-fast: `failed` failed terminally, so nothing else may finish.
    fn abort(&mut self, failed: TaskId, step: &mut SchedulerStep) {
        warn!(task_id = failed, "task failed with fail-fast set; aborting the run");
        self.aborted_by = Some(failed);
        step.merge(self.fail_undispatched());
        step.merge(self.abandon_in_flight());
    }

    /// The backoff delay of a retrying task elapsed.
    pub fn retry_due(&mut self, id: TaskId) -> SchedulerStep {
        let mut step = SchedulerStep::empty();
        if self.state_of(id) == Some(TaskState::Retrying) {
            self.manager().dispatch(id, &mut step);
        }
        step
    }

    /// Cancel a task. Returns `None` if the task is unknown or already
    /// terminal.
    pub fn cancel(&mut self, id: TaskId) -> Option<SchedulerStep> {
        let node = self.tasks.get(&id)?;
        if node.state.is_terminal() {
            return None;
        }

        let mut step = SchedulerStep::empty();
        if node.state.is_in_flight() {
            if let Some(executor) = node.executor.clone() {
                step.remote_cancels.push(RemoteCancel {
                    executor,
                    handle: ExecHandle {
                        task_id: id,
                        attempt: node.attempts,
                    },
                });
            }
        }

        info!(task_id = id, state = ?node.state, "cancelling task");
        self.manager().finish(
            id,
            TaskState::Cancelled,
            Err(TaskError::Cancelled { task: id }),
            &mut step,
        );
        Some(step)
    }

    /// Start draining: fail every task that is not owned by an executor with
    /// `KernelShutdown` (`RunAborted` after a fail-fast abort) and refuse
    /// further dispatches.
    pub fn fail_undispatched(&mut self) -> SchedulerStep {
        self.draining = true;
        let mut step = SchedulerStep::empty();

        let aborted_by = self.aborted_by;
        let mut mgr = self.manager();
        let ids = mgr.collect(|n| n.state.is_undispatched());
        for id in &ids {
            mgr.finish(
                *id,
                TaskState::Failed,
                Err(drain_error(aborted_by, *id)),
                &mut step,
            );
        }

        if !ids.is_empty() {
            info!(count = ids.len(), "failed never-dispatched tasks for shutdown");
        }
        step
    }

    /// Give up on every in-flight task: fail it like
    /// [`Scheduler::fail_undispatched`] does and ask its executor to stop it.
    pub fn abandon_in_flight(&mut self) -> SchedulerStep {
        self.draining = true;
        let mut step = SchedulerStep::empty();

        let ids = self.manager().collect(|n| n.state.is_in_flight());
        for id in ids {
            if let Some(node) = self.tasks.get(&id) {
                if let Some(executor) = node.executor.clone() {
                    step.remote_cancels.push(RemoteCancel {
                        executor,
                        handle: ExecHandle {
                            task_id: id,
                            attempt: node.attempts,
                        },
                    });
                }
            }
            warn!(task_id = id, "abandoning in-flight task");
            let error = drain_error(self.aborted_by, id);
            self.manager()
                .finish(id, TaskState::Failed, Err(error), &mut step);
        }
        step
    }

    pub fn in_flight_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|n| n.state.is_in_flight())
            .count()
    }

    /// No task is waiting on anything.
    pub fn is_quiescent(&self) -> bool {
        self.tasks.values().all(|n| n.state.is_terminal())
    }

    pub fn status(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for node in self.tasks.values() {
            summary.record(node.state);
        }
        summary
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        let node = self.tasks.get(&id)?;
        let error = match node.state {
            TaskState::Failed | TaskState::DepFailed | TaskState::Cancelled => {
                node.last_error.clone()
            }
            _ => None,
        };
        Some(TaskSnapshot {
            id,
            name: node.app.name.clone(),
            state: node.state,
            executor: node.executor.clone(),
            attempts: node.attempts,
            dependencies: node.deps.clone(),
            dependents: self.graph.dependents_of(id).to_vec(),
            error,
        })
    }

    fn make_ready(&mut self, id: TaskId, step: &mut SchedulerStep) {
        if let Some(node) = self.tasks.get_mut(&id) {
            node.state = TaskState::Ready;
        }
        self.manager().dispatch(id, step);
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&mut self.tasks, &self.selector, self.draining, self.aborted_by)
    }
}

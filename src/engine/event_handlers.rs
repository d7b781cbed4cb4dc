// src/engine/event_handlers.rs

//! Event handling logic for the core kernel.

use std::time::Duration;

use crate::dag::{
    DispatchedTask, ExecHandle, RemoteCancel, Scheduler, SchedulerStep, Settlement, TaskNode,
};
use crate::errors::TaskError;
use crate::future::Outcome;
use crate::types::TaskId;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Settle these futures (runs their continuations).
    Settle(Vec<Settlement>),
    /// Ask executors to stop these attempts.
    CancelRemote(Vec<RemoteCancel>),
    /// Send these tasks to their executors.
    DispatchTasks(Vec<DispatchedTask>),
    /// Feed `RetryDue(task)` back into the core after `delay`.
    ScheduleRetry { task: TaskId, delay: Duration },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
}

impl CoreStep {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Number of futures this step settles.
    pub fn settled_count(&self) -> usize {
        self.commands
            .iter()
            .map(|c| match c {
                CoreCommand::Settle(s) => s.len(),
                _ => 0,
            })
            .sum()
    }

    /// Tasks this step dispatches.
    pub fn dispatched(&self) -> Vec<&DispatchedTask> {
        self.commands
            .iter()
            .flat_map(|c| match c {
                CoreCommand::DispatchTasks(tasks) => tasks.iter().collect(),
                _ => Vec::new(),
            })
            .collect()
    }
}

impl From<SchedulerStep> for CoreStep {
    fn from(step: SchedulerStep) -> Self {
        let mut commands = Vec::new();

        if !step.settlements.is_empty() {
            commands.push(CoreCommand::Settle(step.settlements));
        }
        if !step.remote_cancels.is_empty() {
            commands.push(CoreCommand::CancelRemote(step.remote_cancels));
        }
        if !step.newly_dispatched.is_empty() {
            commands.push(CoreCommand::DispatchTasks(step.newly_dispatched));
        }
        for (task, delay) in step.delayed_retries {
            commands.push(CoreCommand::ScheduleRetry { task, delay });
        }

        CoreStep { commands }
    }
}

pub fn handle_submitted(scheduler: &mut Scheduler, node: TaskNode) -> CoreStep {
    scheduler.register(node).into()
}

pub fn handle_dependency_settled(
    scheduler: &mut Scheduler,
    task: TaskId,
    dependency: TaskId,
    result: Result<(), TaskError>,
) -> CoreStep {
    scheduler.dependency_settled(task, dependency, result).into()
}

pub fn handle_task_completed(
    scheduler: &mut Scheduler,
    handle: ExecHandle,
    outcome: Outcome,
) -> CoreStep {
    scheduler.task_completed(handle, outcome).into()
}

pub fn handle_retry_due(scheduler: &mut Scheduler, task: TaskId) -> CoreStep {
    scheduler.retry_due(task).into()
}

/// First phase of shutdown: nothing new gets dispatched.
pub fn handle_shutdown_requested(scheduler: &mut Scheduler) -> CoreStep {
    scheduler.fail_undispatched().into()
}

/// Second phase of shutdown, once the drain timeout expired.
pub fn handle_abandon_in_flight(scheduler: &mut Scheduler) -> CoreStep {
    // Anything that slipped into the undispatched states in between goes too.
    let mut step = scheduler.fail_undispatched();
    step.merge(scheduler.abandon_in_flight());
    step.into()
}

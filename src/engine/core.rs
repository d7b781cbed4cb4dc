// src/engine/core.rs

//! Pure core kernel state machine.
//!
//! This module contains a synchronous, deterministic "core kernel" that
//! consumes [`KernelEvent`]s and produces:
//! - an updated task graph
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell ([`KernelRuntime`](crate::engine::KernelRuntime)) is
//! responsible for:
//! - reading events from the channel
//! - handing dispatched tasks to executors
//! - settling futures, arming retry timers, forwarding cancels
//!
//! The core has no channels and no Tokio types, and does no IO, so it can be
//! stepped by hand in tests.

use crate::dag::{Scheduler, StatusSummary, TaskSnapshot, TaskState};
use crate::engine::event_handlers::{
    handle_abandon_in_flight, handle_dependency_settled, handle_retry_due,
    handle_shutdown_requested, handle_submitted, handle_task_completed, CoreStep,
};
use crate::engine::KernelEvent;
use crate::types::TaskId;

#[derive(Debug)]
pub struct CoreKernel {
    scheduler: Scheduler,
}

impl CoreKernel {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: KernelEvent) -> CoreStep {
        match event {
            KernelEvent::Submitted(node) => handle_submitted(&mut self.scheduler, node),
            KernelEvent::DependencySettled {
                task,
                dependency,
                result,
            } => handle_dependency_settled(&mut self.scheduler, task, dependency, result),
            KernelEvent::TaskStarted(handle) => {
                self.scheduler.task_started(handle);
                CoreStep::idle()
            }
            KernelEvent::TaskCompleted { handle, outcome } => {
                handle_task_completed(&mut self.scheduler, handle, outcome)
            }
            KernelEvent::RetryDue(task) => handle_retry_due(&mut self.scheduler, task),
            KernelEvent::ShutdownRequested => handle_shutdown_requested(&mut self.scheduler),
            KernelEvent::AbandonInFlight => handle_abandon_in_flight(&mut self.scheduler),
        }
    }

    /// Cancel a task; `None` if it is unknown or already terminal.
    pub fn cancel(&mut self, task: TaskId) -> Option<CoreStep> {
        self.scheduler.cancel(task).map(Into::into)
    }

    pub fn status(&self) -> StatusSummary {
        self.scheduler.status()
    }

    pub fn snapshot(&self, task: TaskId) -> Option<TaskSnapshot> {
        self.scheduler.snapshot(task)
    }

    pub fn state_of(&self, task: TaskId) -> Option<TaskState> {
        self.scheduler.state_of(task)
    }

    /// Every known task reached a terminal state.
    pub fn is_drained(&self) -> bool {
        self.scheduler.is_quiescent()
    }

    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight_count()
    }
}

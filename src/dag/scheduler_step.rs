// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use std::time::Duration;

use crate::dag::task_info::{DispatchedTask, ExecHandle};
use crate::future::{AppFuture, Outcome};
use crate::types::TaskId;

/// A future to settle once the step has been applied.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub future: AppFuture,
    pub outcome: Outcome,
}

impl Settlement {
    pub fn task_id(&self) -> TaskId {
        self.future.task_id()
    }
}

/// A best-effort cancel to forward to the executor that owns `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCancel {
    pub executor: String,
    pub handle: ExecHandle,
}

/// Structured result of a single scheduler "step".
///
/// Tests can drive the scheduler by hand and make assertions on what each
/// step produced; the runtime turns it into commands.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks handed to executors as a result of this step.
    pub newly_dispatched: Vec<DispatchedTask>,
    /// Futures that reached a terminal state in this step.
    pub settlements: Vec<Settlement>,
    /// In-flight attempts that should be stopped.
    pub remote_cancels: Vec<RemoteCancel>,
    /// Tasks to re-dispatch after a delay.
    pub delayed_retries: Vec<(TaskId, Duration)>,
}

impl SchedulerStep {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.newly_dispatched.is_empty()
            && self.settlements.is_empty()
            && self.remote_cancels.is_empty()
            && self.delayed_retries.is_empty()
    }

    /// Append everything `other` produced after what this step produced.
    pub fn merge(&mut self, other: SchedulerStep) {
        self.newly_dispatched.extend(other.newly_dispatched);
        self.settlements.extend(other.settlements);
        self.remote_cancels.extend(other.remote_cancels);
        self.delayed_retries.extend(other.delayed_retries);
    }

    /// Ids of the tasks dispatched in this step.
    pub fn dispatched_ids(&self) -> Vec<TaskId> {
        self.newly_dispatched.iter().map(|t| t.task_id).collect()
    }
}

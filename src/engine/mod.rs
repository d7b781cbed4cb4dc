// src/engine/mod.rs

//! Orchestration engine for the kernel.
//!
//! This module ties together:
//! - the task scheduler
//! - the main runtime event loop that reacts to:
//!   - task submissions
//!   - dependency futures settling
//!   - executor start / completion reports
//!   - retry timers, cancellation and shutdown
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. Every graph mutation happens inside the core,
//! which only the runtime loop ever calls.

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::dag::{ExecHandle, StatusSummary, TaskNode, TaskSnapshot};
use crate::errors::TaskError;
use crate::future::Outcome;
use crate::types::TaskId;

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreKernel;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::KernelRuntime;

/// Events flowing into the core from callers, futures and executors.
#[derive(Debug)]
pub enum KernelEvent {
    /// A new task was submitted.
    Submitted(TaskNode),
    /// One dependency of `task` settled.
    DependencySettled {
        task: TaskId,
        dependency: TaskId,
        result: Result<(), TaskError>,
    },
    /// An executor started running an attempt.
    TaskStarted(ExecHandle),
    /// An executor finished an attempt.
    TaskCompleted { handle: ExecHandle, outcome: Outcome },
    /// The backoff delay of a retrying task elapsed.
    RetryDue(TaskId),
    /// Stop dispatching; fail everything not yet handed to an executor.
    ShutdownRequested,
    /// Give up on everything still in flight.
    AbandonInFlight,
}

/// Requests that need an answer from the runtime loop.
#[derive(Debug)]
pub enum ControlRequest {
    Status(oneshot::Sender<StatusSummary>),
    Snapshot(TaskId, oneshot::Sender<Option<TaskSnapshot>>),
    /// Replies `true` if the task was cancelled by this request.
    Cancel(TaskId, oneshot::Sender<bool>),
    /// Replies once no task is pending or in flight.
    WaitDrained(oneshot::Sender<()>),
    /// Feed `ShutdownRequested` to the core; replies with the number of
    /// tasks failed because they were never dispatched.
    BeginShutdown(oneshot::Sender<usize>),
    /// Feed `AbandonInFlight` to the core; replies with the number of tasks
    /// given up on.
    Abandon(oneshot::Sender<usize>),
    /// Release every executor and exit the loop.
    Stop(Option<oneshot::Sender<()>>),
}

/// Everything the runtime loop receives.
#[derive(Debug)]
pub enum KernelMessage {
    Event(KernelEvent),
    Control(ControlRequest),
}

/// Where executors report what happened to the attempts they were given.
///
/// Sending never blocks; reports arriving after the kernel stopped are
/// dropped.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<KernelMessage>,
}

impl CompletionSink {
    pub fn new(tx: mpsc::UnboundedSender<KernelMessage>) -> Self {
        Self { tx }
    }

    pub fn started(&self, handle: ExecHandle) {
        self.send(KernelEvent::TaskStarted(handle));
    }

    pub fn completed(&self, handle: ExecHandle, outcome: Outcome) {
        self.send(KernelEvent::TaskCompleted { handle, outcome });
    }

    fn send(&self, event: KernelEvent) {
        if self.tx.send(KernelMessage::Event(event)).is_err() {
            trace!("kernel gone; dropping executor report");
        }
    }
}

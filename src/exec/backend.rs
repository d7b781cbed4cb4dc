// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The kernel talks to executors only through [`ExecutorBackend`]. Production
//! code uses the closed [`Executor`] enum (local worker pool or batch
//! scheduler); tests can provide their own implementation that records what
//! was dispatched and reports completions directly.
//!
//! Contract: every successful `submit` is followed by exactly one
//! `completed` report on the [`CompletionSink`], even if the attempt is
//! cancelled or the executor shuts down.

use std::path::PathBuf;

use crate::dag::{DispatchedTask, ExecHandle};
use crate::engine::CompletionSink;
use crate::errors::Result;
use crate::exec::batch::BatchExecutor;
use crate::exec::local::LocalExecutor;
use crate::types::BoxFuture;

/// What the kernel hands an executor when it starts.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// This kernel's run directory; staged outputs go below it.
    pub run_dir: PathBuf,
    pub sink: CompletionSink,
}

/// Executor-side state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Accepted, waiting for a worker or in the scheduler queue.
    Queued,
    Running,
    /// Finished (or never known to this executor).
    Done,
    /// The executor cannot tell right now.
    Unknown,
}

/// Trait abstracting how dispatched tasks are executed.
pub trait ExecutorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Upper bound on attempts running at the same time.
    fn max_workers(&self) -> usize;

    /// Called once by the kernel before the first `submit`.
    fn start(&self, ctx: ExecContext) -> Result<()>;

    /// Accept one attempt. Returning `Err` means no completion will follow.
    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>>;

    fn poll(&self, handle: ExecHandle) -> BoxFuture<'_, ExecStatus>;

    /// Best-effort stop. The attempt still produces its completion report.
    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>>;

    /// Stop everything still running and release resources.
    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// The executors the kernel ships with.
#[derive(Debug)]
pub enum Executor {
    Local(LocalExecutor),
    Batch(BatchExecutor),
}

impl ExecutorBackend for Executor {
    fn name(&self) -> &str {
        match self {
            Executor::Local(e) => e.name(),
            Executor::Batch(e) => e.name(),
        }
    }

    fn max_workers(&self) -> usize {
        match self {
            Executor::Local(e) => e.max_workers(),
            Executor::Batch(e) => e.max_workers(),
        }
    }

    fn start(&self, ctx: ExecContext) -> Result<()> {
        match self {
            Executor::Local(e) => e.start(ctx),
            Executor::Batch(e) => e.start(ctx),
        }
    }

    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>> {
        match self {
            Executor::Local(e) => e.submit(task),
            Executor::Batch(e) => e.submit(task),
        }
    }

    fn poll(&self, handle: ExecHandle) -> BoxFuture<'_, ExecStatus> {
        match self {
            Executor::Local(e) => e.poll(handle),
            Executor::Batch(e) => e.poll(handle),
        }
    }

    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>> {
        match self {
            Executor::Local(e) => e.cancel(handle),
            Executor::Batch(e) => e.cancel(handle),
        }
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        match self {
            Executor::Local(e) => e.shutdown(),
            Executor::Batch(e) => e.shutdown(),
        }
    }
}

// src/exec/mod.rs

//! Execution layer.
//!
//! This module is responsible for actually running dispatched tasks and
//! reporting back to the kernel through a
//! [`CompletionSink`](crate::engine::CompletionSink).
//!
//! - [`backend`] provides the [`ExecutorBackend`] trait and the closed
//!   [`Executor`] enum used in production; tests plug their own backends in.
//! - [`local`] is the bounded worker pool running tasks on this host.
//! - [`batch`] runs tasks as batch scheduler jobs through a provider.
//! - [`task_runner`] runs one attempt of a shell or native app.
//! - [`staging`] moves declared outputs into the run directory.
//! - [`registry`] holds the named executors of a kernel.

pub mod backend;
pub mod batch;
pub mod local;
pub mod registry;
pub mod staging;
pub mod task_runner;

pub use backend::{ExecContext, ExecStatus, Executor, ExecutorBackend};
pub use batch::{BatchExecutor, BatchSettings};
pub use local::LocalExecutor;
pub use registry::ExecutorRegistry;

pub use crate::dag::{DispatchedTask, ExecHandle};

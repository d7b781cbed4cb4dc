// src/dag/mod.rs

//! Task graph and scheduling.
//!
//! - [`graph`] holds the dependency graph, grown one submission at a time.
//! - [`scheduler`] contains the per-task state machine: dependency counting,
//!   dispatch, retries, cancellation and shutdown draining.
//! - [`task_info`] provides task records and the dispatched task type.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] applies state transitions and picks executors.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::DagGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::{RemoteCancel, SchedulerStep, Settlement};
pub use state_manager::ExecutorSelector;
pub use task_info::{
    DispatchedTask, ExecHandle, StatusSummary, TaskNode, TaskSnapshot, TaskState,
};

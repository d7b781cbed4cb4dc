// src/engine/runtime.rs

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::{DispatchedTask, RemoteCancel, Settlement, StatusSummary};
use crate::errors::{KernelError, Result, TaskError};
use crate::exec::ExecutorRegistry;

use super::core::CoreKernel;
use super::{CompletionSink, ControlRequest, CoreCommand, KernelEvent, KernelMessage};

/// Drives the core kernel in response to [`KernelMessage`]s and executes the
/// commands it returns: settling futures, dispatching to executors, arming
/// retry timers and forwarding cancels.
///
/// This is the only place the core is touched, so every graph mutation is
/// serialised through this loop.
pub struct KernelRuntime {
    core: CoreKernel,
    rx: mpsc::UnboundedReceiver<KernelMessage>,
    /// Used to feed retry timers back into the loop.
    tx: mpsc::UnboundedSender<KernelMessage>,
    executors: ExecutorRegistry,
    drain_waiters: Vec<oneshot::Sender<()>>,
    last_status: StatusSummary,
}

impl fmt::Debug for KernelRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRuntime")
            .field("core", &self.core)
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

impl KernelRuntime {
    pub fn new(
        core: CoreKernel,
        rx: mpsc::UnboundedReceiver<KernelMessage>,
        tx: mpsc::UnboundedSender<KernelMessage>,
        executors: ExecutorRegistry,
    ) -> Self {
        Self {
            core,
            rx,
            tx,
            executors,
            drain_waiters: Vec::new(),
            last_status: StatusSummary::default(),
        }
    }

    /// Main event loop.
    ///
    /// - Consumes messages from the kernel channel.
    /// - Feeds events into the core and executes the resulting commands.
    /// - Answers control requests; `Stop` releases executors and exits.
    pub async fn run(mut self) -> Result<()> {
        info!(executors = ?self.executors, "kernel runtime started");

        loop {
            let Some(message) = self.rx.recv().await else {
                info!("kernel channel closed; exiting");
                self.executors.shutdown_all().await;
                break;
            };

            match message {
                KernelMessage::Event(event) => {
                    debug!(?event, "kernel received event");
                    self.step_and_execute(event);
                }
                KernelMessage::Control(ControlRequest::Stop(reply)) => {
                    info!("stop requested; releasing executors");
                    self.executors.shutdown_all().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
                KernelMessage::Control(request) => self.handle_control(request),
            }

            self.after_step();
        }

        info!(status = %self.core.status(), "kernel runtime exiting");
        Ok(())
    }

    fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Status(reply) => {
                let _ = reply.send(self.core.status());
            }
            ControlRequest::Snapshot(task, reply) => {
                let _ = reply.send(self.core.snapshot(task));
            }
            ControlRequest::Cancel(task, reply) => {
                let cancelled = match self.core.cancel(task) {
                    Some(step) => {
                        for command in step.commands {
                            self.execute_command(command);
                        }
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            ControlRequest::WaitDrained(reply) => self.drain_waiters.push(reply),
            ControlRequest::BeginShutdown(reply) => {
                let failed = self.step_and_execute(KernelEvent::ShutdownRequested);
                let _ = reply.send(failed);
            }
            ControlRequest::Abandon(reply) => {
                let abandoned = self.step_and_execute(KernelEvent::AbandonInFlight);
                let _ = reply.send(abandoned);
            }
            ControlRequest::Stop(_) => {}
        }
    }

    /// Step the core and execute its commands. Returns how many futures the
    /// step settled.
    fn step_and_execute(&mut self, event: KernelEvent) -> usize {
        let step = self.core.step(event);
        let settled = step.settled_count();
        for command in step.commands {
            self.execute_command(command);
        }
        settled
    }

    /// Log status changes and wake drain waiters.
    fn after_step(&mut self) {
        let status = self.core.status();
        if status != self.last_status {
            debug!(%status, "task status");
            self.last_status = status;
        }

        if !self.drain_waiters.is_empty() && self.core.is_drained() {
            debug!(waiters = self.drain_waiters.len(), "kernel drained");
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Execute a single command from the core.
    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Settle(settlements) => self.settle(settlements),
            CoreCommand::CancelRemote(cancels) => self.cancel_remote(cancels),
            CoreCommand::DispatchTasks(tasks) => self.dispatch(tasks),
            CoreCommand::ScheduleRetry { task, delay } => {
                debug!(task_id = task, ?delay, "retry scheduled");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(KernelMessage::Event(KernelEvent::RetryDue(task)));
                });
            }
        }
    }

    fn settle(&self, settlements: Vec<Settlement>) {
        for Settlement { future, outcome } in settlements {
            if let Err(e) = future.settle(outcome) {
                warn!(task_id = future.task_id(), error = %e, "settling future failed");
            }
        }
    }

    fn cancel_remote(&self, cancels: Vec<RemoteCancel>) {
        for RemoteCancel { executor, handle } in cancels {
            let Some(backend) = self.executors.get(&executor) else {
                continue;
            };
            tokio::spawn(async move {
                if let Err(e) = backend.cancel(handle).await {
                    debug!(executor = %executor, %handle, error = %e, "remote cancel failed");
                }
            });
        }
    }

    fn dispatch(&self, tasks: Vec<DispatchedTask>) {
        let ids: Vec<_> = tasks.iter().map(|t| t.task_id).collect();
        debug!(?ids, "dispatching ready tasks");

        for task in tasks {
            let handle = task.handle();
            let sink = CompletionSink::new(self.tx.clone());

            let Some(backend) = self.executors.get(&task.executor) else {
                sink.completed(
                    handle,
                    Err(TaskError::execution(
                        handle.task_id,
                        KernelError::UnknownExecutor(task.executor.clone()).to_string(),
                    )),
                );
                continue;
            };

            tokio::spawn(async move {
                let executor = backend.name().to_string();
                if let Err(e) = backend.submit(task).await {
                    warn!(executor = %executor, %handle, error = %e, "submit failed");
                    let error = match e {
                        KernelError::Task(t) => t,
                        KernelError::Channel(c) => c.into(),
                        other => TaskError::execution(handle.task_id, other.to_string()),
                    };
                    sink.completed(handle, Err(error));
                }
            });
        }
    }
}

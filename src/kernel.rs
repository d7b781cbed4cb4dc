// src/kernel.rs

//! The data-flow kernel: the caller-facing handle of the engine.
//!
//! A [`DataFlowKernel`] owns the runtime loop task. Submitting an app hands
//! back an [`AppFuture`] immediately; the task runs once every future it was
//! given as an argument resolved, on the executor its app asks for.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{AppDescriptor, Args};
use crate::config::KernelConfig;
use crate::dag::{ExecutorSelector, Scheduler, StatusSummary, TaskNode, TaskSnapshot};
use crate::engine::{
    CompletionSink, ControlRequest, CoreKernel, KernelEvent, KernelMessage, KernelRuntime,
};
use crate::errors::{KernelError, Result, TaskError};
use crate::exec::{ExecContext, ExecutorRegistry};
use crate::future::AppFuture;
use crate::retry::RetryPolicy;
use crate::rundir::make_rundir;
use crate::types::TaskId;

/// Kernel-wide settings.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    /// Base directory; each kernel creates the next numbered directory below it.
    pub run_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Executor for apps that do not name one.
    pub default_executor: Option<String>,
    /// How long `shutdown` waits for in-flight tasks when called without a
    /// timeout.
    pub shutdown_timeout: Duration,
    /// Abort the run on the first task that fails terminally. Off by default:
    /// a failure only reaches the tasks that depend on it.
    pub fail_fast: bool,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("runinfo"),
            retry: RetryPolicy::default(),
            default_executor: None,
            shutdown_timeout: Duration::from_secs(30),
            fail_fast: false,
        }
    }
}

/// What `shutdown` had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks failed because they had not been dispatched yet.
    pub never_dispatched: usize,
    /// In-flight tasks given up on when the timeout expired.
    pub abandoned: usize,
    /// Whether every in-flight task finished within the timeout.
    pub drained: bool,
}

pub struct DataFlowKernel {
    tx: mpsc::UnboundedSender<KernelMessage>,
    next_id: AtomicU64,
    /// No new submissions once set.
    closed: AtomicBool,
    /// The runtime loop was told to stop.
    stopped: AtomicBool,
    run_dir: PathBuf,
    options: KernelOptions,
    join: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl std::fmt::Debug for DataFlowKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFlowKernel")
            .field("run_dir", &self.run_dir)
            .field("submitted", &self.submitted())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DataFlowKernel {
    /// Start a kernel over `executors`.
    ///
    /// Must be called from within a Tokio runtime: the event loop is spawned
    /// onto it.
    pub fn new(executors: ExecutorRegistry, options: KernelOptions) -> Result<Self> {
        if executors.is_empty() {
            return Err(KernelError::ConfigError(
                "a kernel needs at least one executor".to_string(),
            ));
        }
        if let Some(default) = &options.default_executor {
            if executors.get(default).is_none() {
                return Err(KernelError::UnknownExecutor(default.clone()));
            }
        }
        let rt = tokio::runtime::Handle::try_current().map_err(|_| {
            KernelError::ConfigError("the kernel must be started inside a Tokio runtime".to_string())
        })?;

        let run_dir = make_rundir(&options.run_dir)?;
        let (tx, rx) = mpsc::unbounded_channel();

        executors.start_all(&ExecContext {
            run_dir: run_dir.clone(),
            sink: CompletionSink::new(tx.clone()),
        })?;

        let selector = ExecutorSelector::new(
            executors.names().map(str::to_string),
            options.default_executor.clone(),
        );
        let scheduler = Scheduler::new(selector, options.retry).with_fail_fast(options.fail_fast);
        let core = CoreKernel::new(scheduler);
        let runtime = KernelRuntime::new(core, rx, tx.clone(), executors);
        let join = rt.spawn(runtime.run());

        info!(run_dir = %run_dir.display(), "kernel started");

        Ok(Self {
            tx,
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            run_dir,
            options,
            join: Mutex::new(Some(join)),
        })
    }

    /// Build executors and options from a validated configuration.
    pub fn from_config(config: &KernelConfig) -> Result<Self> {
        let executors = crate::config::build_executors(config)?;
        Self::new(executors, crate::config::kernel_options(config))
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    /// Number of tasks submitted so far.
    pub fn submitted(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Submit one invocation of `app`. Never blocks.
    ///
    /// Every future inside `args` becomes a dependency; the task is
    /// dispatched once all of them resolved, and fails with
    /// `DependencyFailed` as soon as one of them fails. After shutdown
    /// began the returned future is already failed with `KernelShutdown`.
    pub fn submit(&self, app: &Arc<AppDescriptor>, args: Args) -> AppFuture {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let future = AppFuture::new(id, app.outputs.clone());

        if self.closed.load(Ordering::SeqCst) {
            debug!(task_id = id, app = %app.name, "submission after shutdown");
            let _ = future.fail(TaskError::KernelShutdown { task: id });
            return future;
        }

        let deps = args.dependencies();
        let node = TaskNode::new(id, app.clone(), args, future.clone());

        if self
            .tx
            .send(KernelMessage::Event(KernelEvent::Submitted(node)))
            .is_err()
        {
            let _ = future.fail(TaskError::KernelShutdown { task: id });
            return future;
        }

        for dep in deps {
            let tx = self.tx.clone();
            let dependency = dep.task_id();
            dep.on_settled(move |outcome| {
                let result = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
                let _ = tx.send(KernelMessage::Event(KernelEvent::DependencySettled {
                    task: id,
                    dependency,
                    result,
                }));
            });
        }

        debug!(task_id = id, app = %app.name, "task submitted");
        future
    }

    /// Cancel a task. Returns `false` if it had already finished.
    pub async fn cancel(&self, task: TaskId) -> Result<bool> {
        self.request(|reply| ControlRequest::Cancel(task, reply)).await
    }

    pub async fn status(&self) -> Result<StatusSummary> {
        self.request(ControlRequest::Status).await
    }

    /// Inspect one task.
    pub async fn task(&self, task: TaskId) -> Result<Option<TaskSnapshot>> {
        self.request(|reply| ControlRequest::Snapshot(task, reply))
            .await
    }

    /// Wait until every submitted task reached a terminal state.
    pub async fn wait_all(&self) -> Result<()> {
        self.request(ControlRequest::WaitDrained).await
    }

    /// Shut the kernel down.
    ///
    /// 1. New submissions fail immediately; tasks never dispatched fail with
    ///    `KernelShutdown`.
    /// 2. In-flight tasks get up to `timeout` (default: the configured
    ///    shutdown timeout) to finish.
    /// 3. Stragglers are cancelled and fail with `KernelShutdown`.
    /// 4. Every executor is shut down and the event loop exits.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<ShutdownReport> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(KernelError::KernelStopped);
        }
        self.closed.store(true, Ordering::SeqCst);
        let timeout = timeout.unwrap_or(self.options.shutdown_timeout);

        let mut report = ShutdownReport {
            never_dispatched: self.request(ControlRequest::BeginShutdown).await?,
            ..ShutdownReport::default()
        };

        let drained = tokio::time::timeout(timeout, self.wait_all()).await;
        match drained {
            Ok(res) => {
                res?;
                report.drained = true;
            }
            Err(_) => {
                warn!(?timeout, "in-flight tasks did not finish in time; abandoning them");
                report.abandoned = self.request(ControlRequest::Abandon).await?;
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        let (reply, done) = oneshot::channel();
        self.tx
            .send(KernelMessage::Control(ControlRequest::Stop(Some(reply))))
            .map_err(|_| KernelError::KernelStopped)?;
        done.await.map_err(|_| KernelError::KernelStopped)?;

        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            match join.await {
                Ok(res) => res?,
                Err(e) => warn!(error = %e, "kernel runtime task failed"),
            }
        }

        info!(?report, "kernel shut down");
        Ok(report)
    }

    async fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> ControlRequest,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(KernelMessage::Control(make(reply)))
            .map_err(|_| KernelError::KernelStopped)?;
        rx.await.map_err(|_| KernelError::KernelStopped)
    }
}

impl Drop for DataFlowKernel {
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("kernel dropped without shutdown; stopping runtime");
            let _ = self
                .tx
                .send(KernelMessage::Control(ControlRequest::Stop(None)));
        }
    }
}

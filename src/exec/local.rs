// src/exec/local.rs

//! Bounded local worker pool.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dag::{DispatchedTask, ExecHandle};
use crate::errors::{KernelError, Result, TaskError};
use crate::exec::backend::{ExecContext, ExecStatus, ExecutorBackend};
use crate::exec::task_runner::{run_task, RunPaths};
use crate::types::BoxFuture;

/// Internal handle for an accepted attempt.
///
/// - `cancel` is used to request that the attempt be stopped, whether it is
///   still waiting for a worker or already running.
/// - `running` flips once a worker picked it up.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    running: bool,
}

type ActiveMap = Arc<Mutex<HashMap<ExecHandle, ActiveTask>>>;

/// A worker held by one attempt. The permit goes back to the pool once the
/// attempt is reported and every clone is gone, including the one a native
/// body that outlived its attempt still holds.
struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs tasks on this host with at most `max_workers` at a time.
///
/// Submissions beyond the limit wait for a permit; they are queued, not
/// started.
pub struct LocalExecutor {
    name: String,
    max_workers: usize,
    workdir: Option<PathBuf>,
    ctx: OnceLock<ExecContext>,
    permits: Arc<Semaphore>,
    active: ActiveMap,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LocalExecutor {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            name: name.into(),
            max_workers,
            workdir: None,
            ctx: OnceLock::new(),
            permits: Arc::new(Semaphore::new(max_workers)),
            active: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run commands from `dir` instead of the process's working directory.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Attempts holding a worker right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of attempts that ever ran at the same time.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn paths(&self, ctx: &ExecContext) -> RunPaths {
        let workdir = self
            .workdir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        RunPaths {
            workdir,
            run_dir: ctx.run_dir.clone(),
        }
    }

    fn spawn_attempt(&self, task: DispatchedTask, ctx: &ExecContext) -> ExecHandle {
        let handle = task.handle();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        lock(&self.active).insert(
            handle,
            ActiveTask {
                cancel: Some(cancel_tx),
                running: false,
            },
        );

        let permits = self.permits.clone();
        let active = self.active.clone();
        let running = self.running.clone();
        let peak = self.peak.clone();
        let sink = ctx.sink.clone();
        let paths = self.paths(ctx);
        let executor = self.name.clone();

        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        lock(&active).remove(&handle);
                        sink.completed(handle, Err(TaskError::KernelShutdown { task: handle.task_id }));
                        return;
                    }
                },
                Ok(()) = &mut cancel_rx => {
                    debug!(executor = %executor, %handle, "cancelled while queued");
                    lock(&active).remove(&handle);
                    sink.completed(handle, Err(TaskError::Cancelled { task: handle.task_id }));
                    return;
                }
            };

            if let Some(slot) = lock(&active).get_mut(&handle) {
                slot.running = true;
            }
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let slot = Arc::new(WorkerSlot {
                _permit: permit,
                running,
            });
            sink.started(handle);

            let outcome = run_task(&task, &paths, &mut cancel_rx, &slot).await;

            lock(&active).remove(&handle);
            sink.completed(handle, outcome);
            drop(slot);
        });

        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_finished());
        handles.push(join);

        handle
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl ExecutorBackend for LocalExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn start(&self, ctx: ExecContext) -> Result<()> {
        info!(executor = %self.name, max_workers = self.max_workers, "local executor started");
        self.ctx
            .set(ctx)
            .map_err(|_| KernelError::ConfigError(format!("executor '{}' started twice", self.name)))
    }

    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>> {
        Box::pin(async move {
            let ctx = self.ctx.get().ok_or_else(|| {
                KernelError::ConfigError(format!("executor '{}' was not started", self.name))
            })?;
            Ok(self.spawn_attempt(task, ctx))
        })
    }

    fn poll(&self, handle: ExecHandle) -> BoxFuture<'_, ExecStatus> {
        Box::pin(async move {
            match lock(&self.active).get(&handle) {
                Some(slot) if slot.running => ExecStatus::Running,
                Some(_) => ExecStatus::Queued,
                None => ExecStatus::Done,
            }
        })
    }

    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sender = lock(&self.active)
                .get_mut(&handle)
                .and_then(|slot| slot.cancel.take());
            match sender {
                Some(tx) => {
                    if tx.send(()).is_err() {
                        debug!(executor = %self.name, %handle, "attempt finished while cancelling");
                    }
                }
                None => debug!(executor = %self.name, %handle, "nothing to cancel"),
            }
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // Waiting attempts fail their acquire once the pool is closed.
            self.permits.close();

            let senders: Vec<oneshot::Sender<()>> = lock(&self.active)
                .values_mut()
                .filter_map(|slot| slot.cancel.take())
                .collect();
            for tx in senders {
                let _ = tx.send(());
            }

            let handles: Vec<JoinHandle<()>> = lock(&self.handles).drain(..).collect();
            for h in handles {
                let _ = h.await;
            }

            info!(executor = %self.name, peak = self.peak_running(), "local executor shut down");
            Ok(())
        })
    }
}

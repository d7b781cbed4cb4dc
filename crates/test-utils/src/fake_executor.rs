use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dagkernel::errors::{KernelError, Result, TaskError};
use dagkernel::exec::{DispatchedTask, ExecContext, ExecHandle, ExecStatus, ExecutorBackend};
use dagkernel::future::{AppValue, Outcome};
use dagkernel::types::BoxFuture;

type Responder = Arc<dyn Fn(&DispatchedTask) -> Outcome + Send + Sync>;

/// Shared view on what a fake executor saw. Clone it before handing the
/// executor to a registry.
#[derive(Clone, Default)]
pub struct ExecutorLog {
    dispatched: Arc<Mutex<Vec<DispatchedTask>>>,
    cancelled: Arc<Mutex<Vec<ExecHandle>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl ExecutorLog {
    pub fn dispatched(&self) -> Vec<DispatchedTask> {
        self.dispatched.lock().unwrap().clone()
    }

    /// `(task_id, attempt)` of every dispatch, in order.
    pub fn attempts(&self) -> Vec<(u64, u32)> {
        self.dispatched()
            .iter()
            .map(|t| (t.task_id, t.attempt))
            .collect()
    }

    pub fn dispatched_ids(&self) -> Vec<u64> {
        self.dispatched().iter().map(|t| t.task_id).collect()
    }

    pub fn was_dispatched(&self, task_id: u64) -> bool {
        self.dispatched().iter().any(|t| t.task_id == task_id)
    }

    pub fn cancelled(&self) -> Vec<ExecHandle> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// A fake executor that:
/// - records every dispatched task
/// - immediately reports started + completed with whatever the responder
///   returns (success with a `null` value by default).
pub struct RecordingExecutor {
    name: String,
    responder: Responder,
    log: ExecutorLog,
    ctx: OnceLock<ExecContext>,
}

impl RecordingExecutor {
    pub fn new(name: &str) -> Self {
        Self::responding(name, |_| Ok(AppValue::new(serde_json::Value::Null)))
    }

    pub fn responding<F>(name: &str, responder: F) -> Self
    where
        F: Fn(&DispatchedTask) -> Outcome + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            responder: Arc::new(responder),
            log: ExecutorLog::default(),
            ctx: OnceLock::new(),
        }
    }

    /// Fail every attempt with `ExecutionFailed`.
    pub fn failing(name: &str, message: &str) -> Self {
        let message = message.to_string();
        Self::responding(name, move |t| {
            Err(TaskError::execution(t.task_id, message.clone()))
        })
    }

    pub fn log(&self) -> ExecutorLog {
        self.log.clone()
    }
}

impl ExecutorBackend for RecordingExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_workers(&self) -> usize {
        usize::MAX
    }

    fn start(&self, ctx: ExecContext) -> Result<()> {
        self.ctx
            .set(ctx)
            .map_err(|_| KernelError::ConfigError("started twice".to_string()))
    }

    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>> {
        Box::pin(async move {
            let ctx = self
                .ctx
                .get()
                .ok_or_else(|| KernelError::ConfigError("not started".to_string()))?;
            let handle = task.handle();
            self.log.dispatched.lock().unwrap().push(task.clone());

            let outcome = (self.responder)(&task);
            ctx.sink.started(handle);
            ctx.sink.completed(handle, outcome);
            Ok(handle)
        })
    }

    fn poll(&self, _handle: ExecHandle) -> BoxFuture<'_, ExecStatus> {
        Box::pin(async { ExecStatus::Done })
    }

    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.log.cancelled.lock().unwrap().push(handle);
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Test-side handle of a [`ManualExecutor`]: decide when and how each
/// attempt finishes.
#[derive(Clone, Default)]
pub struct ManualControl {
    log: ExecutorLog,
    ctx: Arc<OnceLock<ExecContext>>,
    open: Arc<Mutex<BTreeMap<ExecHandle, DispatchedTask>>>,
}

impl ManualControl {
    pub fn log(&self) -> &ExecutorLog {
        &self.log
    }

    /// Attempts submitted and not yet completed, oldest first.
    pub fn open(&self) -> Vec<ExecHandle> {
        self.open.lock().unwrap().keys().copied().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    pub fn is_open(&self, task_id: u64) -> bool {
        self.open().iter().any(|h| h.task_id == task_id)
    }

    /// Open attempt of `task_id`, if any.
    pub fn handle_of(&self, task_id: u64) -> Option<ExecHandle> {
        self.open().into_iter().find(|h| h.task_id == task_id)
    }

    pub fn start(&self, handle: ExecHandle) {
        if let Some(ctx) = self.ctx.get() {
            ctx.sink.started(handle);
        }
    }

    /// Report an outcome for `handle` (even if it is no longer open, to
    /// simulate late completions).
    pub fn complete(&self, handle: ExecHandle, outcome: Outcome) {
        self.open.lock().unwrap().remove(&handle);
        if let Some(ctx) = self.ctx.get() {
            ctx.sink.completed(handle, outcome);
        }
    }

    pub fn succeed(&self, handle: ExecHandle, value: serde_json::Value) {
        self.complete(handle, Ok(AppValue::new(value)));
    }

    pub fn fail(&self, handle: ExecHandle, message: &str) {
        self.complete(
            handle,
            Err(TaskError::execution(handle.task_id, message.to_string())),
        );
    }
}

/// Executor that accepts attempts and leaves them running until the test
/// completes them through its [`ManualControl`].
pub struct ManualExecutor {
    name: String,
    control: ManualControl,
}

impl ManualExecutor {
    pub fn new(name: &str) -> (Self, ManualControl) {
        let control = ManualControl::default();
        (
            Self {
                name: name.to_string(),
                control: control.clone(),
            },
            control,
        )
    }
}

impl ExecutorBackend for ManualExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_workers(&self) -> usize {
        usize::MAX
    }

    fn start(&self, ctx: ExecContext) -> Result<()> {
        self.control
            .ctx
            .set(ctx)
            .map_err(|_| KernelError::ConfigError("started twice".to_string()))
    }

    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>> {
        Box::pin(async move {
            let handle = task.handle();
            self.control.log.dispatched.lock().unwrap().push(task.clone());
            self.control.open.lock().unwrap().insert(handle, task);
            Ok(handle)
        })
    }

    fn poll(&self, handle: ExecHandle) -> BoxFuture<'_, ExecStatus> {
        Box::pin(async move {
            if self.control.open.lock().unwrap().contains_key(&handle) {
                ExecStatus::Running
            } else {
                ExecStatus::Done
            }
        })
    }

    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.control.log.cancelled.lock().unwrap().push(handle);
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.control.log.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

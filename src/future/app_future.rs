// src/future/app_future.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::errors::{KernelError, Result, TaskError};
use crate::future::data_future::DataFuture;
use crate::types::{TaskId, Value};

/// Successful result of an app: the value it produced plus the staged paths
/// of its declared outputs (same order as declared).
#[derive(Debug, Clone, PartialEq)]
pub struct AppValue {
    pub value: Value,
    pub outputs: Vec<PathBuf>,
}

impl AppValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs(value: Value, outputs: Vec<PathBuf>) -> Self {
        Self { value, outputs }
    }
}

/// Settled state of a future.
pub type Outcome = std::result::Result<AppValue, TaskError>;

type Callback = Box<dyn FnOnce(&Outcome) + Send + 'static>;

enum FutureState {
    Pending(Vec<Callback>),
    /// Settled, and the settling thread is still running callbacks. Callbacks
    /// registered meanwhile queue up behind them.
    Draining(Outcome, Vec<Callback>),
    Settled(Outcome),
}

impl FutureState {
    fn outcome(&self) -> Option<&Outcome> {
        match self {
            FutureState::Pending(_) => None,
            FutureState::Draining(outcome, _) | FutureState::Settled(outcome) => Some(outcome),
        }
    }
}

struct Inner {
    task_id: TaskId,
    declared_outputs: Vec<String>,
    state: Mutex<FutureState>,
    /// Wakes blocking `wait*` callers.
    cond: Condvar,
    /// Wakes async `result()` callers.
    notify: Notify,
}

/// Single-assignment placeholder for the result of a submitted app.
///
/// Cloning is cheap and yields another handle to the same future.
#[derive(Clone)]
pub struct AppFuture {
    inner: Arc<Inner>,
}

impl AppFuture {
    /// Create a new pending future.
    pub fn new(task_id: TaskId, declared_outputs: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                task_id,
                declared_outputs,
                state: Mutex::new(FutureState::Pending(Vec::new())),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn declared_outputs(&self) -> &[String] {
        &self.inner.declared_outputs
    }

    /// One [`DataFuture`] per declared output file.
    pub fn outputs(&self) -> Vec<DataFuture> {
        (0..self.inner.declared_outputs.len())
            .map(|idx| DataFuture::new(self.clone(), idx))
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.lock().outcome().is_some()
    }

    /// Non-blocking peek at the outcome.
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.lock().outcome().cloned()
    }

    /// Register a continuation.
    ///
    /// Callbacks run in registration order and each fires exactly once. Before
    /// settlement, and while the settling thread is still running earlier
    /// callbacks, the callback is queued and runs on the settling thread.
    /// Once that is done it runs immediately on the calling thread.
    ///
    /// Callbacks should be short. Use [`AppFuture::on_settled_deferred`] for
    /// anything that may block.
    pub fn on_settled<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let settled = {
            let mut guard = self.lock();
            match &mut *guard {
                FutureState::Pending(callbacks) | FutureState::Draining(_, callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                FutureState::Settled(outcome) => outcome.clone(),
            }
        };
        callback(&settled);
    }

    /// Register a continuation whose body runs on the blocking dispatch pool
    /// instead of the settling thread.
    pub fn on_settled_deferred<F>(&self, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.on_settled(move |outcome| {
            let outcome = outcome.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || callback(outcome));
                }
                Err(_) => {
                    std::thread::spawn(move || callback(outcome));
                }
            }
        });
    }

    /// Settle successfully.
    pub fn resolve(&self, value: AppValue) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settle with a failure.
    pub fn fail(&self, error: TaskError) -> Result<()> {
        self.settle(Err(error))
    }

    /// Settle the future with `outcome`, then run every registered callback
    /// in registration order.
    ///
    /// Returns [`KernelError::AlreadySettled`] if the future was settled before.
    pub fn settle(&self, outcome: Outcome) -> Result<()> {
        let mut callbacks = {
            let mut guard = self.lock();
            if guard.outcome().is_some() {
                return Err(KernelError::AlreadySettled(self.inner.task_id));
            }
            match std::mem::replace(
                &mut *guard,
                FutureState::Draining(outcome.clone(), Vec::new()),
            ) {
                FutureState::Pending(callbacks) => callbacks,
                _ => Vec::new(),
            }
        };

        debug!(
            task_id = self.inner.task_id,
            success = outcome.is_ok(),
            callbacks = callbacks.len(),
            "future settled"
        );

        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();

        // Late registrations queue up while this runs; drain until none are left.
        loop {
            for callback in callbacks {
                callback(&outcome);
            }
            let mut guard = self.lock();
            let late = match &mut *guard {
                FutureState::Draining(_, late) => std::mem::take(late),
                _ => Vec::new(),
            };
            if late.is_empty() {
                *guard = FutureState::Settled(outcome);
                return Ok(());
            }
            callbacks = late;
        }
    }

    /// Block the calling thread until settled and return the full outcome.
    ///
    /// Must not be called from inside the kernel's own callbacks.
    pub fn wait_outcome(&self) -> Outcome {
        let mut guard = self.lock();
        loop {
            if let Some(outcome) = guard.outcome() {
                return outcome.clone();
            }
            guard = self
                .inner
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until settled; return the value or the failure.
    pub fn wait(&self) -> std::result::Result<Value, TaskError> {
        self.wait_outcome().map(|v| v.value)
    }

    /// Like [`AppFuture::wait`], giving up after `timeout` (`None` if still pending).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<std::result::Result<Value, TaskError>> {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .cond
            .wait_timeout_while(guard, timeout, |state| {
                matches!(state, FutureState::Pending(_))
            })
            .unwrap_or_else(PoisonError::into_inner);

        guard.outcome().map(|outcome| outcome.clone().map(|v| v.value))
    }

    /// Async wait for the full outcome.
    pub async fn outcome(&self) -> Outcome {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a settle in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            trace!(task_id = self.inner.task_id, "awaiting future");
            notified.await;
        }
    }

    /// Async wait; return the value or the failure.
    pub async fn result(&self) -> std::result::Result<Value, TaskError> {
        self.outcome().await.map(|v| v.value)
    }

    fn lock(&self) -> MutexGuard<'_, FutureState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AppFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lock().outcome() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("AppFuture")
            .field("task_id", &self.inner.task_id)
            .field("state", &state)
            .finish()
    }
}

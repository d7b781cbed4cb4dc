// src/exec/batch.rs

//! Executor that runs each attempt as a batch scheduler job.
//!
//! One monitor task per attempt launches the job through the provider and
//! polls it every `poll_interval` until it leaves the queue, enforcing the
//! walltime and held-time budgets along the way.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::{DispatchedTask, ExecHandle};
use crate::engine::CompletionSink;
use crate::errors::{ChannelError, KernelError, Result, TaskError};
use crate::exec::backend::{ExecContext, ExecStatus, ExecutorBackend};
use crate::exec::staging::{parse_result_value, stage_remote_outputs};
use crate::future::{AppValue, Outcome};
use crate::provider::{JobId, JobRequest, JobState, LaunchedJob, Provider};
use crate::retry::Backoff;
use crate::types::BoxFuture;

/// Polling behaviour of a [`BatchExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub poll_interval: Duration,
    /// Longest a job may sit in a held state before it is given up on.
    pub max_held: Option<Duration>,
    /// Consecutive unusable status answers tolerated before failing.
    pub status_retries: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_held: None,
            status_retries: 3,
        }
    }
}

struct JobSlot {
    cancel: Option<oneshot::Sender<()>>,
    status: ExecStatus,
}

type JobMap = Arc<Mutex<HashMap<ExecHandle, JobSlot>>>;

pub struct BatchExecutor {
    name: String,
    max_workers: usize,
    provider: Arc<dyn Provider>,
    settings: BatchSettings,
    ctx: OnceLock<ExecContext>,
    permits: Arc<Semaphore>,
    jobs: JobMap,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchExecutor {
    pub fn new(
        name: impl Into<String>,
        max_workers: usize,
        provider: Arc<dyn Provider>,
        settings: BatchSettings,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            name: name.into(),
            max_workers,
            provider,
            settings,
            ctx: OnceLock::new(),
            permits: Arc::new(Semaphore::new(max_workers)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything one monitor task needs.
struct Monitor {
    task: DispatchedTask,
    provider: Arc<dyn Provider>,
    settings: BatchSettings,
    jobs: JobMap,
    sink: CompletionSink,
    run_dir: std::path::PathBuf,
}

impl Monitor {
    fn handle(&self) -> ExecHandle {
        self.task.handle()
    }

    fn set_status(&self, status: ExecStatus) {
        if let Some(slot) = lock(&self.jobs).get_mut(&self.handle()) {
            slot.status = status;
        }
    }

    fn job_name(&self) -> String {
        let clean: String = self
            .task
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("dagkernel_{}_{}_{}", clean, self.task.task_id, self.task.attempt)
    }

    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        let handle = self.handle();
        let command = match self.task.app.render_command(&self.task.args) {
            Ok(c) => c,
            Err(msg) => {
                self.finish(Err(TaskError::execution(handle.task_id, msg)));
                return;
            }
        };

        let request = JobRequest {
            job_name: self.job_name(),
            command,
            walltime: self.task.walltime,
        };

        let launched = tokio::select! {
            res = self.provider.launch(&request) => res,
            Ok(()) = &mut cancel_rx => {
                self.finish(Err(TaskError::Cancelled { task: handle.task_id }));
                return;
            }
        };
        let job = match launched {
            Ok(job) => job,
            Err(e) => {
                warn!(task_id = handle.task_id, error = %e, "job launch failed");
                self.finish(Err(launch_error(handle.task_id, e)));
                return;
            }
        };

        let outcome = self.watch(&job, &mut cancel_rx).await;
        self.finish(outcome);
    }

    /// Poll `job` until it reaches a terminal state or a budget runs out.
    async fn watch(&self, job: &LaunchedJob, cancel_rx: &mut oneshot::Receiver<()>) -> Outcome {
        let task_id = self.task.task_id;
        let walltime = self
            .task
            .walltime
            .or_else(|| self.provider.default_walltime());
        let backoff = Backoff::new(self.settings.poll_interval, self.settings.poll_interval * 8);

        let mut clock: Option<Instant> = None;
        let mut held_since: Option<Instant> = None;
        let mut failures: u32 = 0;
        let mut delay = self.settings.poll_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = &mut *cancel_rx => {
                    info!(task_id, job_id = %job.id, "cancelling job");
                    self.cancel_job(&job.id).await;
                    return Err(TaskError::Cancelled { task: task_id });
                }
            }
            delay = self.settings.poll_interval;

            let state = match self.provider.status(&job.id).await {
                Ok(JobState::Unknown) => Err("scheduler gave no usable status".to_string()),
                Ok(state) => Ok(state),
                Err(e) => Err(e.to_string()),
            };

            let state = match state {
                Ok(s) => {
                    failures = 0;
                    s
                }
                Err(reason) => {
                    failures += 1;
                    if failures > self.settings.status_retries {
                        return Err(TaskError::ExecutionFailed {
                            task: task_id,
                            message: format!(
                                "status of job {} unavailable after {} attempts: {reason}",
                                job.id, failures
                            ),
                            exit_code: None,
                        });
                    }
                    debug!(task_id, job_id = %job.id, failures, %reason, "status poll failed; backing off");
                    delay = backoff.delay(failures);
                    continue;
                }
            };

            match state {
                JobState::Queued => {
                    self.set_status(ExecStatus::Queued);
                    held_since = None;
                }
                JobState::Running | JobState::Held => {
                    if clock.is_none() {
                        clock = Some(Instant::now());
                        self.sink.started(self.handle());
                    }
                    self.set_status(ExecStatus::Running);

                    if state == JobState::Held {
                        let since = *held_since.get_or_insert_with(Instant::now);
                        if let Some(max_held) = self.settings.max_held {
                            let held_for = since.elapsed();
                            if held_for > max_held {
                                warn!(task_id, job_id = %job.id, ?held_for, "job held too long");
                                self.cancel_job(&job.id).await;
                                return Err(TaskError::JobHeld {
                                    task: task_id,
                                    job: job.id.to_string(),
                                    held_for,
                                });
                            }
                        }
                    } else {
                        held_since = None;
                    }
                }
                JobState::Done => return self.collect(job).await,
                JobState::Failed => {
                    return Err(TaskError::ExecutionFailed {
                        task: task_id,
                        message: format!("scheduler reports job {} failed", job.id),
                        exit_code: None,
                    });
                }
                JobState::Unknown => {}
            }

            if let (Some(limit), Some(started)) = (walltime, clock) {
                if started.elapsed() > limit {
                    warn!(task_id, job_id = %job.id, ?limit, "job exceeded walltime");
                    self.cancel_job(&job.id).await;
                    return Err(TaskError::JobTimeout {
                        task: task_id,
                        job: Some(job.id.to_string()),
                        walltime: limit,
                    });
                }
            }
        }
    }

    /// The job left the queue: read its exit code and stdout, pull outputs.
    async fn collect(&self, job: &LaunchedJob) -> Outcome {
        let task_id = self.task.task_id;
        let channel = self.provider.channel();

        let code = self
            .read_job_file(&job.exitcode)
            .await?
            .and_then(|s| s.trim().parse::<i32>().ok());

        match code {
            Some(0) => {}
            Some(c) => {
                let stderr = self
                    .read_job_file(&job.stderr)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                return Err(TaskError::ExecutionFailed {
                    task: task_id,
                    message: format!("job {} exited with status {c}: {}", job.id, stderr.trim()),
                    exit_code: Some(c),
                });
            }
            None => {
                return Err(TaskError::execution(
                    task_id,
                    format!("job {} left the queue without an exit code", job.id),
                ));
            }
        }

        let stdout = self.read_job_file(&job.stdout).await?.unwrap_or_default();
        let outputs = stage_remote_outputs(&self.task, channel, &job.workdir, &self.run_dir).await?;
        Ok(AppValue::with_outputs(parse_result_value(&stdout), outputs))
    }

    /// Read one of the job's files; `None` if it does not exist.
    ///
    /// Transport failures back off and retry like status polls do, and fail
    /// the attempt once `status_retries` is used up.
    async fn read_job_file(&self, path: &Path) -> std::result::Result<Option<String>, TaskError> {
        let backoff = Backoff::new(self.settings.poll_interval, self.settings.poll_interval * 8);
        let mut failures: u32 = 0;
        loop {
            match read_remote(self.provider.channel(), path).await {
                Ok(contents) => return Ok(contents),
                Err(e) => {
                    failures += 1;
                    if failures > self.settings.status_retries {
                        return Err(TaskError::ExecutionFailed {
                            task: self.task.task_id,
                            message: format!(
                                "reading {} failed after {} attempts: {e}",
                                path.display(),
                                failures
                            ),
                            exit_code: None,
                        });
                    }
                    debug!(
                        task_id = self.task.task_id,
                        path = %path.display(),
                        failures,
                        error = %e,
                        "reading job file failed; backing off"
                    );
                    tokio::time::sleep(backoff.delay(failures)).await;
                }
            }
        }
    }

    async fn cancel_job(&self, job: &JobId) {
        if let Err(e) = self.provider.cancel(job).await {
            warn!(job_id = %job, error = %e, "cancelling job failed");
        }
    }

    fn finish(&self, outcome: Outcome) {
        let handle = self.handle();
        lock(&self.jobs).remove(&handle);
        self.sink.completed(handle, outcome);
    }
}

/// `cat` a remote file. A failing `cat` means the file is missing; only a
/// transport failure is an error.
async fn read_remote(
    channel: &dyn crate::channel::Channel,
    path: &Path,
) -> std::result::Result<Option<String>, ChannelError> {
    let cmd = format!("cat {}", shell_words::quote(&path.display().to_string()));
    let out = channel.execute(&cmd).await?;
    if out.success() {
        Ok(Some(out.stdout))
    } else {
        debug!(path = %path.display(), stderr = %out.stderr.trim(), "job file not readable");
        Ok(None)
    }
}

fn launch_error(task: u64, e: KernelError) -> TaskError {
    match e {
        KernelError::Task(t) => t,
        KernelError::Channel(c) => c.into(),
        other => TaskError::execution(task, other.to_string()),
    }
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("provider", &self.provider.label())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExecutorBackend for BatchExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn start(&self, ctx: ExecContext) -> Result<()> {
        self.provider.set_local_dir(ctx.run_dir.join("submit_scripts"));
        info!(
            executor = %self.name,
            provider = %self.provider.label(),
            max_workers = self.max_workers,
            "batch executor started"
        );
        self.ctx
            .set(ctx)
            .map_err(|_| KernelError::ConfigError(format!("executor '{}' started twice", self.name)))
    }

    fn submit(&self, task: DispatchedTask) -> BoxFuture<'_, Result<ExecHandle>> {
        Box::pin(async move {
            let ctx = self.ctx.get().ok_or_else(|| {
                KernelError::ConfigError(format!("executor '{}' was not started", self.name))
            })?;
            if !task.app.is_shell() {
                return Err(TaskError::execution(
                    task.task_id,
                    format!("executor '{}' only runs shell apps", self.name),
                )
                .into());
            }

            let handle = task.handle();
            let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
            lock(&self.jobs).insert(
                handle,
                JobSlot {
                    cancel: Some(cancel_tx),
                    status: ExecStatus::Queued,
                },
            );

            let monitor = Monitor {
                task,
                provider: self.provider.clone(),
                settings: self.settings,
                jobs: self.jobs.clone(),
                sink: ctx.sink.clone(),
                run_dir: ctx.run_dir.clone(),
            };
            let permits = self.permits.clone();

            let join = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok(),
                    Ok(()) = &mut cancel_rx => {
                        monitor.finish(Err(TaskError::Cancelled { task: handle.task_id }));
                        return;
                    }
                };
                let Some(_permit) = permit else {
                    monitor.finish(Err(TaskError::KernelShutdown { task: handle.task_id }));
                    return;
                };
                monitor.run(cancel_rx).await;
            });

            let mut handles = lock(&self.handles);
            handles.retain(|h| !h.is_finished());
            handles.push(join);

            debug!(executor = %self.name, %handle, "attempt accepted");
            Ok(handle)
        })
    }

    fn poll(&self, handle: ExecHandle) -> BoxFuture<'_, ExecStatus> {
        Box::pin(async move {
            lock(&self.jobs)
                .get(&handle)
                .map_or(ExecStatus::Done, |s| s.status)
        })
    }

    fn cancel(&self, handle: ExecHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sender = lock(&self.jobs)
                .get_mut(&handle)
                .and_then(|slot| slot.cancel.take());
            if let Some(tx) = sender {
                let _ = tx.send(());
            }
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.permits.close();

            let senders: Vec<oneshot::Sender<()>> = lock(&self.jobs)
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

            self.provider.close().await?;
            info!(executor = %self.name, "batch executor shut down");
            Ok(())
        })
    }
}

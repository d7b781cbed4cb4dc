// src/provider/mod.rs

//! Batch scheduler providers.
//!
//! A [`Provider`] turns a shell command into a scheduler job: it renders a
//! submit script, pushes it through its [`Channel`], submits it and later
//! answers status queries. [`BatchProvider`] covers every supported
//! scheduler; the differences live in [`SchedulerKind`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::errors::{ChannelError, Result};
use crate::types::BoxFuture;

pub mod job;
pub mod resources;
pub mod scheduler_kind;
pub mod templates;

pub use job::{JobId, JobState};
pub use resources::ResourceSpec;
pub use scheduler_kind::SchedulerKind;

use templates::{render_script, render_wrapper, ScriptContext, PLAIN_SCRIPT};

/// One job to launch.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_name: String,
    pub command: String,
    pub walltime: Option<Duration>,
}

/// Where a launched job keeps its files on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
    pub id: JobId,
    pub workdir: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub exitcode: PathBuf,
}

pub trait Provider: Send + Sync + std::fmt::Debug {
    fn label(&self) -> String;

    /// The channel jobs are submitted and staged through.
    fn channel(&self) -> &dyn Channel;

    /// Directory on this host for rendered scripts.
    fn set_local_dir(&self, dir: PathBuf);

    /// Walltime for jobs whose task does not set one.
    fn default_walltime(&self) -> Option<Duration>;

    fn launch<'a>(&'a self, request: &'a JobRequest) -> BoxFuture<'a, Result<LaunchedJob>>;

    /// Query the scheduler. Transport failures are returned as errors so
    /// the caller can tell them apart from a confirmed state.
    fn status<'a>(&'a self, job: &'a JobId) -> BoxFuture<'a, std::result::Result<JobState, ChannelError>>;

    fn cancel<'a>(&'a self, job: &'a JobId) -> BoxFuture<'a, Result<()>>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug)]
pub struct BatchProvider {
    kind: SchedulerKind,
    resources: ResourceSpec,
    /// Script directory on the target.
    script_dir: PathBuf,
    template: Option<String>,
    channel: Box<dyn Channel>,
    local_dir: OnceLock<PathBuf>,
}

impl BatchProvider {
    pub fn new(
        kind: SchedulerKind,
        resources: ResourceSpec,
        script_dir: PathBuf,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            kind,
            resources,
            script_dir,
            template: None,
            channel,
            local_dir: OnceLock::new(),
        }
    }

    /// Replace the scheduler's default submit template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn resources(&self) -> &ResourceSpec {
        &self.resources
    }

    fn template(&self) -> &str {
        self.template
            .as_deref()
            .unwrap_or_else(|| self.kind.default_template())
    }

    fn local_dir(&self) -> PathBuf {
        self.local_dir
            .get()
            .cloned()
            .unwrap_or_else(|| std::env::temp_dir().join("dagkernel-scripts"))
    }

    /// Render every file of a job. Returns `(file name, contents)` pairs
    /// and the name of the file to hand to the submit command.
    pub fn render_job(
        &self,
        request: &JobRequest,
        job: &LaunchedJob,
    ) -> Result<(Vec<(String, String)>, String)> {
        let q = |p: &Path| shell_words::quote(&p.display().to_string()).into_owned();

        let body = render_wrapper(
            &q(&job.workdir),
            &request.command,
            &q(&job.stdout),
            &q(&job.stderr),
            &q(&job.exitcode),
        )?;

        let name = &request.job_name;
        let script_name = format!("{name}.sh");
        let script_path = self.script_dir.join(&script_name);
        let walltime = self.resources.effective_walltime(request.walltime);

        let ctx = ScriptContext {
            job: self.resources.context(name, request.walltime),
            walltime_seconds: walltime.map(|d| d.as_secs()),
            body,
            script_path: script_path.display().to_string(),
            scheduler_stdout: self.script_dir.join(format!("{name}.submit.stdout")).display().to_string(),
            scheduler_stderr: self.script_dir.join(format!("{name}.submit.stderr")).display().to_string(),
        };

        if self.kind.uses_submit_description() {
            let submit_name = format!("{name}.submit");
            let files = vec![
                (script_name, render_script(PLAIN_SCRIPT, &ctx)?),
                (submit_name.clone(), render_script(self.template(), &ctx)?),
            ];
            Ok((files, submit_name))
        } else {
            let files = vec![(script_name.clone(), render_script(self.template(), &ctx)?)];
            Ok((files, script_name))
        }
    }

    /// Target-side paths for a job named `job_name`.
    pub fn job_paths(&self, job_name: &str) -> LaunchedJob {
        let workdir = self.script_dir.join(job_name);
        LaunchedJob {
            id: JobId(String::new()),
            stdout: self.script_dir.join(format!("{job_name}.stdout")),
            stderr: self.script_dir.join(format!("{job_name}.stderr")),
            exitcode: self.script_dir.join(format!("{job_name}.ec")),
            workdir,
        }
    }
}

impl Provider for BatchProvider {
    fn label(&self) -> String {
        format!("{}@{}", self.kind, self.channel.label())
    }

    fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    fn set_local_dir(&self, dir: PathBuf) {
        if self.local_dir.set(dir).is_err() {
            debug!(provider = %self.label(), "local script dir already set");
        }
    }

    fn default_walltime(&self) -> Option<Duration> {
        self.resources.walltime
    }

    fn launch<'a>(&'a self, request: &'a JobRequest) -> BoxFuture<'a, Result<LaunchedJob>> {
        Box::pin(async move {
            let mut job = self.job_paths(&request.job_name);
            let (files, submit_file) = self.render_job(request, &job)?;

            let mkdir = format!(
                "mkdir -p {} {}",
                shell_words::quote(&self.script_dir.display().to_string()),
                shell_words::quote(&job.workdir.display().to_string()),
            );
            let out = self.channel.execute(&mkdir).await?;
            if !out.success() {
                return Err(anyhow!("creating job directories failed: {}", out.stderr.trim()).into());
            }

            let local_dir = self.local_dir();
            tokio::fs::create_dir_all(&local_dir).await?;
            for (name, contents) in &files {
                let local = local_dir.join(name);
                tokio::fs::write(&local, contents).await?;
                self.channel
                    .push_file(&local, &self.script_dir.join(name))
                    .await?;
            }

            let submit_path = self.script_dir.join(&submit_file);
            let cmd = self.kind.submit_command(&submit_path.display().to_string());
            let out = self.channel.execute(&cmd).await?;
            if !out.success() {
                return Err(anyhow!(
                    "{} submit failed (exit {}): {}",
                    self.kind,
                    out.exit_code,
                    out.stderr.trim()
                )
                .into());
            }

            job.id = self.kind.parse_job_id(&out.stdout).ok_or_else(|| {
                anyhow!("could not parse {} job id from {:?}", self.kind, out.stdout.trim())
            })?;

            info!(
                provider = %self.label(),
                job_id = %job.id,
                job_name = %request.job_name,
                "job submitted"
            );
            Ok(job)
        })
    }

    fn status<'a>(
        &'a self,
        job: &'a JobId,
    ) -> BoxFuture<'a, std::result::Result<JobState, ChannelError>> {
        Box::pin(async move {
            let out = self.channel.execute(&self.kind.status_command(job)).await?;
            let state = self.kind.parse_status(job, &out);
            debug!(job_id = %job, %state, "job status");
            Ok(state)
        })
    }

    fn cancel<'a>(&'a self, job: &'a JobId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let out = self.channel.execute(&self.kind.cancel_command(job)).await?;
            if !out.success() {
                warn!(job_id = %job, stderr = %out.stderr.trim(), "cancel command failed");
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.channel.close().await?;
            Ok(())
        })
    }
}

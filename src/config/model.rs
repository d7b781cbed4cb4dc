// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::BatchSettings;
use crate::provider::{ResourceSpec, SchedulerKind};
use crate::types::{ExecutorHint, Value};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [kernel]
/// run_dir = "runinfo"
/// retries = 1
///
/// [executor.local]
/// kind = "local"
/// max_workers = 4
///
/// [task.A]
/// cmd = "echo 5"
///
/// [task.B]
/// cmd = "echo $(( {x} + 1 ))"
/// args = { x = "@A" }
/// ```
///
/// All sections except `[task.*]` are optional. Without any `[executor.*]`
/// section a single local executor named `local` is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub kernel: KernelSection,

    /// Keys are executor names.
    #[serde(default)]
    pub executor: BTreeMap<String, ExecutorConfig>,

    /// Keys are task names, used by `@name` references and `after`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[kernel]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSection {
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Retry budget of tasks that do not set their own.
    #[serde(default)]
    pub retries: u32,

    /// Base delay before the first retry; doubled for every further one.
    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub max_retry_delay: Option<String>,

    #[serde(default)]
    pub default_executor: Option<String>,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    /// Abort every unfinished task once one task fails for good.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("runinfo")
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            retries: 0,
            retry_delay: None,
            max_retry_delay: None,
            default_executor: None,
            shutdown_timeout: default_shutdown_timeout(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Local,
    Batch,
}

/// `[executor.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    pub kind: ExecutorKind,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Working directory of local tasks; defaults to the current directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    #[serde(default)]
    pub poll_interval: Option<String>,

    #[serde(default)]
    pub max_held: Option<String>,

    #[serde(default)]
    pub status_retries: Option<u32>,

    /// Required for `kind = "batch"`, rejected otherwise.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

fn default_max_workers() -> usize {
    1
}

/// `[executor.<name>.provider]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub scheduler: SchedulerKind,

    /// Where scripts and job files live on the target.
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,

    #[serde(default)]
    pub walltime: Option<String>,

    #[serde(default = "default_one")]
    pub nodes: u32,

    #[serde(default = "default_one")]
    pub tasks_per_node: u32,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    /// Extra directives pasted into the submit script.
    #[serde(default)]
    pub scheduler_options: Option<String>,

    /// Replacement for the scheduler's built-in submit template.
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_script_dir() -> PathBuf {
    PathBuf::from(".dagkernel_scripts")
}

fn default_one() -> u32 {
    1
}

/// `[executor.<name>.provider.channel]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum ChannelConfig {
    Local {
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Ssh {
        host: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        port: Option<u16>,
    },
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Local { cwd: None }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Shell command template; `{name}` placeholders are filled from `args`.
    pub cmd: String,

    /// Keyword arguments. A string `"@A"` is the result of task `A`,
    /// `"@A:file"` the staged path of `A`'s declared output `file`, and
    /// `"@@x"` the literal string `"@x"`.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,

    /// Entries of `{inputs}`; same reference syntax as `args`.
    #[serde(default)]
    pub inputs: Vec<Value>,

    /// Ordering-only dependencies.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    /// `"name"` or `["a", "b"]`.
    #[serde(default)]
    pub executor: Option<ExecutorHint>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub walltime: Option<String>,

    #[serde(default)]
    pub stdout: Option<PathBuf>,

    #[serde(default)]
    pub stderr: Option<PathBuf>,
}

/// Validated configuration: every reference resolves, every duration parsed
/// and the task graph is acyclic.
///
/// Only produced by `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub kernel: KernelSettings,
    pub executors: BTreeMap<String, ExecutorSpec>,
    pub tasks: BTreeMap<String, TaskSpec>,
    /// Task names, dependencies first.
    order: Vec<String>,
}

impl KernelConfig {
    pub(crate) fn new_unchecked(
        kernel: KernelSettings,
        executors: BTreeMap<String, ExecutorSpec>,
        tasks: BTreeMap<String, TaskSpec>,
        order: Vec<String>,
    ) -> Self {
        Self {
            kernel,
            executors,
            tasks,
            order,
        }
    }

    /// Task names in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSettings {
    pub run_dir: PathBuf,
    pub retries: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub default_executor: Option<String>,
    pub shutdown_timeout: Duration,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSpec {
    Local {
        max_workers: usize,
        workdir: Option<PathBuf>,
    },
    Batch {
        max_workers: usize,
        settings: BatchSettings,
        provider: ProviderSpec,
    },
}

impl ExecutorSpec {
    pub fn max_workers(&self) -> usize {
        match self {
            ExecutorSpec::Local { max_workers, .. } | ExecutorSpec::Batch { max_workers, .. } => {
                *max_workers
            }
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorSpec::Local { .. } => ExecutorKind::Local,
            ExecutorSpec::Batch { .. } => ExecutorKind::Batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub scheduler: SchedulerKind,
    pub script_dir: PathBuf,
    pub resources: ResourceSpec,
    pub template: Option<String>,
    pub channel: ChannelConfig,
}

/// One argument of a configured task.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgRef {
    Value(Value),
    /// Result of another task.
    Task(String),
    /// Staged path of another task's declared output.
    Output { task: String, file: String },
}

impl ArgRef {
    /// Decode the `@name` / `@name:file` / `@@literal` syntax.
    pub fn parse(value: &Value) -> Self {
        let Some(s) = value.as_str() else {
            return ArgRef::Value(value.clone());
        };
        if let Some(literal) = s.strip_prefix("@@") {
            return ArgRef::Value(Value::String(format!("@{literal}")));
        }
        match s.strip_prefix('@') {
            Some(reference) => match reference.split_once(':') {
                Some((task, file)) => ArgRef::Output {
                    task: task.to_string(),
                    file: file.to_string(),
                },
                None => ArgRef::Task(reference.to_string()),
            },
            None => ArgRef::Value(value.clone()),
        }
    }

    /// Task this argument waits on, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            ArgRef::Value(_) => None,
            ArgRef::Task(task) | ArgRef::Output { task, .. } => Some(task),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub cmd: String,
    pub args: BTreeMap<String, ArgRef>,
    pub inputs: Vec<ArgRef>,
    pub after: Vec<String>,
    pub outputs: Vec<String>,
    pub executor: ExecutorHint,
    pub retries: Option<u32>,
    pub walltime: Option<Duration>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl TaskSpec {
    /// Names of the tasks this one waits on, without duplicates.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        let referenced = self
            .args
            .values()
            .chain(self.inputs.iter())
            .filter_map(ArgRef::task)
            .chain(self.after.iter().map(String::as_str));
        for dep in referenced {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

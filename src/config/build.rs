// src/config/build.rs

//! Turn a validated [`KernelConfig`] into the runtime objects a kernel is
//! made of.

use std::sync::Arc;

use tracing::debug;

use crate::app::{AppBuilder, AppDescriptor};
use crate::channel::{Channel, LocalChannel, SshChannel};
use crate::config::model::{ChannelConfig, ExecutorSpec, KernelConfig, ProviderSpec, TaskSpec};
use crate::errors::Result;
use crate::exec::{BatchExecutor, Executor, ExecutorRegistry, LocalExecutor};
use crate::kernel::KernelOptions;
use crate::provider::{BatchProvider, Provider};
use crate::retry::{Backoff, RetryPolicy};

pub fn kernel_options(config: &KernelConfig) -> KernelOptions {
    let k = &config.kernel;
    KernelOptions {
        run_dir: k.run_dir.clone(),
        retry: RetryPolicy {
            default_retries: k.retries,
            backoff: Backoff::new(k.retry_delay, k.max_retry_delay),
        },
        default_executor: k.default_executor.clone(),
        shutdown_timeout: k.shutdown_timeout,
        fail_fast: k.fail_fast,
    }
}

/// One executor per `[executor.<name>]` section.
pub fn build_executors(config: &KernelConfig) -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    for (name, spec) in &config.executors {
        debug!(executor = %name, kind = ?spec.kind(), workers = spec.max_workers(), "building executor");
        registry.add(build_executor(name, spec))?;
    }
    Ok(registry)
}

fn build_executor(name: &str, spec: &ExecutorSpec) -> Executor {
    match spec {
        ExecutorSpec::Local {
            max_workers,
            workdir,
        } => {
            let executor = LocalExecutor::new(name, *max_workers);
            Executor::Local(match workdir {
                Some(dir) => executor.with_workdir(dir),
                None => executor,
            })
        }
        ExecutorSpec::Batch {
            max_workers,
            settings,
            provider,
        } => Executor::Batch(BatchExecutor::new(
            name,
            *max_workers,
            build_provider(provider),
            *settings,
        )),
    }
}

pub fn build_provider(spec: &ProviderSpec) -> Arc<dyn Provider> {
    let provider = BatchProvider::new(
        spec.scheduler,
        spec.resources.clone(),
        spec.script_dir.clone(),
        build_channel(&spec.channel),
    );
    match &spec.template {
        Some(template) => Arc::new(provider.with_template(template.clone())),
        None => Arc::new(provider),
    }
}

pub fn build_channel(config: &ChannelConfig) -> Box<dyn Channel> {
    match config {
        ChannelConfig::Local { cwd: Some(dir) } => Box::new(LocalChannel::in_dir(dir)),
        ChannelConfig::Local { cwd: None } => Box::new(LocalChannel::new()),
        ChannelConfig::Ssh { host, user, port } => {
            Box::new(SshChannel::new(host.clone(), user.clone(), *port))
        }
    }
}

/// The shell app a configured task runs.
pub fn build_app(task: &TaskSpec) -> Arc<AppDescriptor> {
    let mut builder = AppBuilder::shell(&task.name, &task.cmd)
        .outputs(task.outputs.iter().cloned())
        .executor(task.executor.clone());
    if let Some(retries) = task.retries {
        builder = builder.retries(retries);
    }
    if let Some(walltime) = task.walltime {
        builder = builder.walltime(walltime);
    }
    if let Some(path) = &task.stdout {
        builder = builder.stdout(path.clone());
    }
    if let Some(path) = &task.stderr {
        builder = builder.stderr(path.clone());
    }
    builder.build()
}

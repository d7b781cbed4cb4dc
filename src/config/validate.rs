// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    ArgRef, ExecutorConfig, ExecutorKind, ExecutorSpec, KernelConfig, KernelSection,
    KernelSettings, ProviderConfig, ProviderSpec, RawConfigFile, TaskConfig, TaskSpec,
};
use crate::errors::{KernelError, Result};
use crate::exec::BatchSettings;
use crate::provider::ResourceSpec;
use crate::types::{parse_duration, ExecutorHint};

/// Name of the executor used when the file declares none.
pub const IMPLICIT_EXECUTOR: &str = "local";

impl TryFrom<RawConfigFile> for KernelConfig {
    type Error = KernelError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;

        let kernel = kernel_settings(&raw.kernel)?;
        let executors = executor_specs(&raw.executor)?;
        validate_default_executor(&kernel, &executors)?;

        let mut tasks = BTreeMap::new();
        for (name, task) in &raw.task {
            let spec = task_spec(name, task)?;
            validate_task_executor(&spec, &kernel, &executors)?;
            tasks.insert(name.clone(), spec);
        }

        validate_task_dependencies(&tasks)?;
        let order = topological_order(&tasks)?;

        Ok(KernelConfig::new_unchecked(kernel, executors, tasks, order))
    }
}

fn config_err(msg: impl Into<String>) -> KernelError {
    KernelError::ConfigError(msg.into())
}

fn duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_err(format!("{field}: {e}")))
}

fn optional_duration(field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    value.map(|v| duration(field, v)).transpose()
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_err(
            "config must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

fn kernel_settings(section: &KernelSection) -> Result<KernelSettings> {
    let retry_delay = optional_duration("[kernel].retry_delay", section.retry_delay.as_deref())?
        .unwrap_or(Duration::ZERO);
    let max_retry_delay =
        optional_duration("[kernel].max_retry_delay", section.max_retry_delay.as_deref())?
            .unwrap_or(Duration::from_secs(60));

    Ok(KernelSettings {
        run_dir: section.run_dir.clone(),
        retries: section.retries,
        retry_delay,
        max_retry_delay,
        default_executor: section.default_executor.clone(),
        shutdown_timeout: duration("[kernel].shutdown_timeout", &section.shutdown_timeout)?,
        fail_fast: section.fail_fast,
    })
}

fn executor_specs(raw: &BTreeMap<String, ExecutorConfig>) -> Result<BTreeMap<String, ExecutorSpec>> {
    let mut specs = BTreeMap::new();

    if raw.is_empty() {
        let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
        specs.insert(
            IMPLICIT_EXECUTOR.to_string(),
            ExecutorSpec::Local {
                max_workers: workers,
                workdir: None,
            },
        );
        return Ok(specs);
    }

    for (name, exec) in raw {
        if exec.max_workers == 0 {
            return Err(config_err(format!(
                "[executor.{name}].max_workers must be >= 1 (got 0)"
            )));
        }

        let spec = match exec.kind {
            ExecutorKind::Local => {
                if exec.provider.is_some() {
                    return Err(config_err(format!(
                        "[executor.{name}] is a local executor and cannot have a provider"
                    )));
                }
                ExecutorSpec::Local {
                    max_workers: exec.max_workers,
                    workdir: exec.workdir.clone(),
                }
            }
            ExecutorKind::Batch => {
                let provider = exec.provider.as_ref().ok_or_else(|| {
                    config_err(format!(
                        "[executor.{name}] is a batch executor and needs a [executor.{name}.provider] section"
                    ))
                })?;
                ExecutorSpec::Batch {
                    max_workers: exec.max_workers,
                    settings: batch_settings(name, exec)?,
                    provider: provider_spec(name, provider)?,
                }
            }
        };
        specs.insert(name.clone(), spec);
    }
    Ok(specs)
}

fn batch_settings(name: &str, exec: &ExecutorConfig) -> Result<BatchSettings> {
    let defaults = BatchSettings::default();
    let poll_interval = optional_duration(
        &format!("[executor.{name}].poll_interval"),
        exec.poll_interval.as_deref(),
    )?
    .unwrap_or(defaults.poll_interval);

    if poll_interval.is_zero() {
        return Err(config_err(format!(
            "[executor.{name}].poll_interval must be greater than zero"
        )));
    }

    Ok(BatchSettings {
        poll_interval,
        max_held: optional_duration(
            &format!("[executor.{name}].max_held"),
            exec.max_held.as_deref(),
        )?,
        status_retries: exec.status_retries.unwrap_or(defaults.status_retries),
    })
}

fn provider_spec(name: &str, provider: &ProviderConfig) -> Result<ProviderSpec> {
    if provider.nodes == 0 || provider.tasks_per_node == 0 {
        return Err(config_err(format!(
            "[executor.{name}.provider]: nodes and tasks_per_node must be >= 1"
        )));
    }

    Ok(ProviderSpec {
        scheduler: provider.scheduler,
        script_dir: provider.script_dir.clone(),
        resources: ResourceSpec {
            walltime: optional_duration(
                &format!("[executor.{name}.provider].walltime"),
                provider.walltime.as_deref(),
            )?,
            nodes: provider.nodes,
            tasks_per_node: provider.tasks_per_node,
            queue: provider.queue.clone(),
            account: provider.account.clone(),
            scheduler_options: provider.scheduler_options.clone(),
        },
        template: provider.template.clone(),
        channel: provider.channel.clone(),
    })
}

fn validate_default_executor(
    kernel: &KernelSettings,
    executors: &BTreeMap<String, ExecutorSpec>,
) -> Result<()> {
    match &kernel.default_executor {
        Some(name) if !executors.contains_key(name) => {
            Err(KernelError::UnknownExecutor(name.clone()))
        }
        _ => Ok(()),
    }
}

fn task_spec(name: &str, task: &TaskConfig) -> Result<TaskSpec> {
    if task.cmd.trim().is_empty() {
        return Err(config_err(format!("task '{name}' has an empty `cmd`")));
    }

    Ok(TaskSpec {
        name: name.to_string(),
        cmd: task.cmd.clone(),
        args: task
            .args
            .iter()
            .map(|(k, v)| (k.clone(), ArgRef::parse(v)))
            .collect(),
        inputs: task.inputs.iter().map(ArgRef::parse).collect(),
        after: task.after.clone(),
        outputs: task.outputs.clone(),
        executor: task.executor.clone().unwrap_or_default(),
        retries: task.retries,
        walltime: optional_duration(
            &format!("[task.{name}].walltime"),
            task.walltime.as_deref(),
        )?,
        stdout: task.stdout.clone(),
        stderr: task.stderr.clone(),
    })
}

fn validate_task_executor(
    task: &TaskSpec,
    kernel: &KernelSettings,
    executors: &BTreeMap<String, ExecutorSpec>,
) -> Result<()> {
    match &task.executor {
        ExecutorHint::Default => {
            if kernel.default_executor.is_none() && executors.len() > 1 {
                return Err(config_err(format!(
                    "task '{}' names no executor and [kernel].default_executor is not set",
                    task.name
                )));
            }
        }
        ExecutorHint::AnyOf(names) if names.is_empty() => {
            return Err(config_err(format!(
                "task '{}' has an empty executor list",
                task.name
            )));
        }
        hint => {
            for name in hint.names() {
                if !executors.contains_key(name) {
                    return Err(KernelError::UnknownExecutor(name.to_string()));
                }
            }
        }
    }
    Ok(())
}

fn validate_task_dependencies(tasks: &BTreeMap<String, TaskSpec>) -> Result<()> {
    for (name, task) in tasks {
        for dep in task.dependencies() {
            let Some(dep_task) = tasks.get(dep) else {
                return Err(config_err(format!(
                    "task '{name}' has unknown dependency '{dep}'"
                )));
            };
            if dep == name {
                return Err(config_err(format!(
                    "task '{name}' cannot depend on itself"
                )));
            }
            let missing_output = task
                .args
                .values()
                .chain(task.inputs.iter())
                .find_map(|arg| match arg {
                    ArgRef::Output { task, file }
                        if task == dep && !dep_task.outputs.contains(file) =>
                    {
                        Some(file)
                    }
                    _ => None,
                });
            if let Some(file) = missing_output {
                return Err(config_err(format!(
                    "task '{name}' references output '{file}' which task '{dep}' does not declare"
                )));
            }
        }
    }
    Ok(())
}

/// Order tasks so that every task comes after its dependencies.
///
/// Edge direction: dep -> task. A cycle is reported as
/// [`KernelError::DagCycle`].
fn topological_order(tasks: &BTreeMap<String, TaskSpec>) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in tasks {
        for dep in task.dependencies() {
            graph.add_edge(dep, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(KernelError::DagCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

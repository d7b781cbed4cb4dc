// src/lib.rs

pub mod app;
pub mod channel;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod future;
pub mod kernel;
pub mod logging;
pub mod provider;
pub mod retry;
pub mod rundir;
pub mod types;
pub mod workflow;

pub use app::{AppBuilder, AppDescriptor, Args, ResolvedArgs};
pub use errors::{KernelError, TaskError};
pub use future::{AppFuture, AppValue, DataFuture};
pub use kernel::{DataFlowKernel, KernelOptions, ShutdownReport};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, ArgRef, ExecutorSpec, KernelConfig};
use crate::workflow::run_workflow;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - kernel + executors
/// - workflow submission
/// - Ctrl-C handling
///
/// Returns whether every task succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let mut cfg = load_and_validate(&args.config)?;
    if args.fail_fast {
        cfg.kernel.fail_fast = true;
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(true);
    }

    let kernel = DataFlowKernel::from_config(&cfg)?;
    info!(run_dir = %kernel.run_dir().display(), "running workflow");

    let report = tokio::select! {
        report = run_workflow(&kernel, &cfg) => Some(report?),
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("interrupted; shutting down");
            None
        }
    };

    let shutdown = kernel.shutdown(args.shutdown_timeout).await?;
    debug!(?shutdown, "kernel stopped");

    let Some(report) = report else {
        return Ok(false);
    };

    for result in &report.results {
        println!("{result}");
    }
    let failed = report.failed().count();
    if failed > 0 {
        warn!(failed, total = report.results.len(), "workflow finished with failures");
    }
    Ok(failed == 0)
}

/// Simple dry-run output: print executors, then tasks in submission order.
fn print_dry_run(cfg: &KernelConfig) {
    println!("dagkernel dry-run");
    println!("  kernel.run_dir = {}", cfg.kernel.run_dir.display());
    println!("  kernel.retries = {}", cfg.kernel.retries);
    if cfg.kernel.fail_fast {
        println!("  kernel.fail_fast = true");
    }
    if let Some(default) = &cfg.kernel.default_executor {
        println!("  kernel.default_executor = {default}");
    }
    println!();

    println!("executors ({}):", cfg.executors.len());
    for (name, spec) in &cfg.executors {
        match spec {
            ExecutorSpec::Local { max_workers, .. } => {
                println!("  - {name}: local, max_workers = {max_workers}");
            }
            ExecutorSpec::Batch {
                max_workers,
                provider,
                ..
            } => {
                println!(
                    "  - {name}: batch ({}), max_workers = {max_workers}",
                    provider.scheduler
                );
            }
        }
    }
    println!();

    println!("tasks ({}):", cfg.tasks.len());
    for name in cfg.topological_order() {
        let Some(task) = cfg.tasks.get(name) else {
            continue;
        };
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        let deps = task.dependencies();
        if !deps.is_empty() {
            println!("      depends on: {deps:?}");
        }
        for (key, arg) in &task.args {
            match arg {
                ArgRef::Value(v) => println!("      {key} = {v}"),
                ArgRef::Task(t) => println!("      {key} = result of {t}"),
                ArgRef::Output { task, file } => println!("      {key} = {file} from {task}"),
            }
        }
        if !task.outputs.is_empty() {
            println!("      outputs: {:?}", task.outputs);
        }
        if let Some(retries) = task.retries {
            println!("      retries: {retries}");
        }
        if let Some(walltime) = task.walltime {
            println!("      walltime: {walltime:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}

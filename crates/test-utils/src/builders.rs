#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dagkernel::app::{AppBuilder, AppDescriptor};
use dagkernel::config::{parse_and_validate, KernelConfig};
use dagkernel::errors::Result;
use dagkernel::exec::{ExecutorBackend, ExecutorRegistry};
use dagkernel::kernel::{DataFlowKernel, KernelOptions};
use dagkernel::retry::RetryPolicy;

/// Builder for workflow TOML, to simplify config test setup.
///
/// Sections are emitted in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    kernel: Vec<String>,
    sections: Vec<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key = value` (value given as TOML) to `[kernel]`.
    pub fn kernel(mut self, key: &str, value: &str) -> Self {
        self.kernel.push(format!("{key} = {value}"));
        self
    }

    pub fn local_executor(mut self, name: &str, max_workers: usize) -> Self {
        self.sections.push(format!(
            "[executor.{name}]\nkind = \"local\"\nmax_workers = {max_workers}\n"
        ));
        self
    }

    /// Add a raw section, e.g. a batch executor with its provider.
    pub fn section(mut self, toml: &str) -> Self {
        self.sections.push(toml.to_string());
        self
    }

    pub fn task(self, name: &str, task: TaskBuilder) -> Self {
        self.section(&task.render(name))
    }

    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        if !self.kernel.is_empty() {
            out.push_str("[kernel]\n");
            for line in &self.kernel {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        for section in &self.sections {
            out.push_str(section);
            out.push('\n');
        }
        out
    }

    pub fn try_build(&self) -> Result<KernelConfig> {
        parse_and_validate(&self.to_toml())
    }

    pub fn build(&self) -> KernelConfig {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }

    /// Write the config as `dagkernel.toml` into `dir`.
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("dagkernel.toml");
        std::fs::write(&path, self.to_toml()).expect("write config");
        path
    }
}

/// Builder for one `[task.<name>]` section.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    lines: Vec<String>,
}

impl TaskBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            lines: vec![format!("cmd = {}", toml_str(cmd))],
        }
    }

    /// `args.<key> = value` (value given as TOML, e.g. `"\"@A\""` or `"3"`).
    pub fn arg(mut self, key: &str, value: &str) -> Self {
        self.lines.push(format!("args.{key} = {value}"));
        self
    }

    /// `args.<key> = "@task"`.
    pub fn arg_from(self, key: &str, task: &str) -> Self {
        let value = toml_str(&format!("@{task}"));
        self.arg(key, &value)
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.lines.push(format!("after = {}", toml_list(deps)));
        self
    }

    pub fn outputs(mut self, files: &[&str]) -> Self {
        self.lines.push(format!("outputs = {}", toml_list(files)));
        self
    }

    pub fn executor(mut self, name: &str) -> Self {
        self.lines.push(format!("executor = {}", toml_str(name)));
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.lines.push(format!("retries = {n}"));
        self
    }

    pub fn walltime(mut self, walltime: &str) -> Self {
        self.lines.push(format!("walltime = {}", toml_str(walltime)));
        self
    }

    fn render(&self, name: &str) -> String {
        format!("[task.{name}]\n{}\n", self.lines.join("\n"))
    }
}

fn toml_str(s: &str) -> String {
    format!("{s:?}")
}

fn toml_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| toml_str(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Kernel options writing run directories below `base`.
pub fn options_in(base: &Path) -> KernelOptions {
    KernelOptions {
        run_dir: base.join("runinfo"),
        retry: RetryPolicy::default(),
        default_executor: None,
        shutdown_timeout: Duration::from_secs(5),
        fail_fast: false,
    }
}

/// Start a kernel over a single executor.
pub fn kernel_with<E>(executor: E, base: &Path) -> DataFlowKernel
where
    E: ExecutorBackend + 'static,
{
    kernel_with_options(executor, options_in(base))
}

pub fn kernel_with_options<E>(executor: E, options: KernelOptions) -> DataFlowKernel
where
    E: ExecutorBackend + 'static,
{
    let registry = ExecutorRegistry::new()
        .with(executor)
        .expect("register executor");
    DataFlowKernel::new(registry, options).expect("start kernel")
}

/// Native app returning its `x` keyword argument plus one.
pub fn add_one() -> Arc<AppDescriptor> {
    AppBuilder::native("add_one", |args| {
        let x = args
            .get_i64("x")
            .ok_or_else(|| anyhow::anyhow!("missing integer argument x"))?;
        Ok(serde_json::json!(x + 1))
    })
    .build()
}

/// Native app returning `value`.
pub fn constant(value: serde_json::Value) -> Arc<AppDescriptor> {
    AppBuilder::native("constant", move |_| Ok(value.clone())).build()
}

/// Native app that always fails with `message`.
pub fn failing(message: &'static str) -> Arc<AppDescriptor> {
    AppBuilder::native("failing", move |_| Err(anyhow::anyhow!(message))).build()
}

/// Shell app running `cmd` as-is.
pub fn shell(name: &str, cmd: &str) -> Arc<AppDescriptor> {
    AppBuilder::shell(name, cmd).build()
}

// src/app.rs

//! App definitions and submission arguments.
//!
//! An app is described once with [`AppBuilder`] and frozen into an immutable
//! [`AppDescriptor`]. Every invocation then pairs that descriptor with an
//! [`Args`] value whose slots may be concrete values or futures of other apps.
//! The kernel only looks at the futures; what the app *does* is left to the
//! executor that runs it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Captures, Regex};

use crate::future::{AppFuture, DataFuture};
use crate::types::{ExecutorHint, TaskId, Value};

/// Signature of a native (in-process) app.
pub type NativeFn = Arc<dyn Fn(&ResolvedArgs) -> anyhow::Result<Value> + Send + Sync>;

/// What an app runs.
#[derive(Clone)]
pub enum AppKind {
    /// A shell command template; `{name}` / `{0}` placeholders are filled
    /// from the resolved arguments.
    Shell { template: String },
    /// A Rust closure, run on a local worker.
    Native(NativeFn),
}

impl fmt::Debug for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppKind::Shell { template } => f
                .debug_struct("Shell")
                .field("template", template)
                .finish(),
            AppKind::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Immutable description of an app, shared by all of its invocations.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    pub name: String,
    pub kind: AppKind,
    /// Declared output files, relative to the execution working directory.
    pub outputs: Vec<String>,
    pub executor: ExecutorHint,
    /// Per-app retry budget; `None` falls back to the kernel default.
    pub retries: Option<u32>,
    /// Walltime budget for one attempt.
    pub walltime: Option<Duration>,
    /// Where to write the command's stdout / stderr, if anywhere.
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl AppDescriptor {
    pub fn is_shell(&self) -> bool {
        matches!(self.kind, AppKind::Shell { .. })
    }

    /// Render the shell command for this invocation.
    ///
    /// Placeholders:
    /// - `{name}`: keyword argument `name`
    /// - `{0}`, `{1}`, ...: positional arguments
    /// - `{inputs}`: all `inputs` entries, space separated
    /// - `{outputs}`: declared outputs, space separated
    ///
    /// String values are shell-quoted; `${VAR}` is left for the shell.
    pub fn render_command(&self, args: &ResolvedArgs) -> Result<String, String> {
        let template = match &self.kind {
            AppKind::Shell { template } => template,
            AppKind::Native(_) => {
                return Err(format!("app '{}' is not a shell app", self.name));
            }
        };

        let mut missing: Vec<String> = Vec::new();
        let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if caps.get(1).is_some() {
                // `${VAR}` belongs to the shell.
                return whole.to_string();
            }
            let key = &caps[2];
            match self.lookup(key, args) {
                Some(s) => s,
                None => {
                    missing.push(key.to_string());
                    whole.to_string()
                }
            }
        });

        if !missing.is_empty() {
            return Err(format!(
                "app '{}': no argument for placeholder(s) {:?}",
                self.name, missing
            ));
        }
        Ok(rendered.into_owned())
    }

    fn lookup(&self, key: &str, args: &ResolvedArgs) -> Option<String> {
        if let Ok(idx) = key.parse::<usize>() {
            return args.positional.get(idx).map(shell_value);
        }
        match key {
            "inputs" if !args.keyword.contains_key("inputs") => Some(
                args.inputs
                    .iter()
                    .map(shell_value)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            "outputs" if !args.keyword.contains_key("outputs") => Some(
                self.outputs
                    .iter()
                    .map(|o| shell_words::quote(o).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => args.keyword.get(key).map(shell_value),
        }
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$)?\{([A-Za-z_][A-Za-z0-9_]*|[0-9]+)\}").expect("placeholder regex is valid")
});

/// Render a value for interpolation into a shell command.
fn shell_value(value: &Value) -> String {
    match value {
        Value::String(s) => shell_words::quote(s).into_owned(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(shell_value).collect::<Vec<_>>().join(" "),
        Value::Object(_) => shell_words::quote(&value.to_string()).into_owned(),
    }
}

/// Builder turning a command or closure into an [`AppDescriptor`].
#[derive(Debug, Clone)]
pub struct AppBuilder {
    app: AppDescriptor,
}

impl AppBuilder {
    pub fn shell(name: &str, template: &str) -> Self {
        Self::with_kind(
            name,
            AppKind::Shell {
                template: template.to_string(),
            },
        )
    }

    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(&ResolvedArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::with_kind(name, AppKind::Native(Arc::new(f)))
    }

    fn with_kind(name: &str, kind: AppKind) -> Self {
        Self {
            app: AppDescriptor {
                name: name.to_string(),
                kind,
                outputs: Vec::new(),
                executor: ExecutorHint::Default,
                retries: None,
                walltime: None,
                stdout: None,
                stderr: None,
            },
        }
    }

    pub fn output(mut self, name: &str) -> Self {
        self.app.outputs.push(name.to_string());
        self
    }

    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.app.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn executor(mut self, hint: impl Into<ExecutorHint>) -> Self {
        self.app.executor = hint.into();
        self
    }

    pub fn any_executor_of(mut self, names: &[&str]) -> Self {
        self.app.executor = ExecutorHint::AnyOf(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.app.retries = Some(retries);
        self
    }

    pub fn walltime(mut self, walltime: Duration) -> Self {
        self.app.walltime = Some(walltime);
        self
    }

    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.app.stdout = Some(path.into());
        self
    }

    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.app.stderr = Some(path.into());
        self
    }

    pub fn build(self) -> Arc<AppDescriptor> {
        Arc::new(self.app)
    }
}

/// One argument slot of an invocation.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Value(Value),
    Future(AppFuture),
    Data(DataFuture),
}

impl ArgValue {
    /// The future this slot waits on, if any.
    pub fn dependency(&self) -> Option<&AppFuture> {
        match self {
            ArgValue::Value(_) => None,
            ArgValue::Future(f) => Some(f),
            ArgValue::Data(d) => Some(d.parent()),
        }
    }
}

/// Conversion into an argument slot.
pub trait IntoArg {
    fn into_arg(self) -> ArgValue;
}

impl IntoArg for ArgValue {
    fn into_arg(self) -> ArgValue {
        self
    }
}

impl IntoArg for AppFuture {
    fn into_arg(self) -> ArgValue {
        ArgValue::Future(self)
    }
}

impl IntoArg for &AppFuture {
    fn into_arg(self) -> ArgValue {
        ArgValue::Future(self.clone())
    }
}

impl IntoArg for DataFuture {
    fn into_arg(self) -> ArgValue {
        ArgValue::Data(self)
    }
}

impl IntoArg for &DataFuture {
    fn into_arg(self) -> ArgValue {
        ArgValue::Data(self.clone())
    }
}

macro_rules! value_args {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> ArgValue {
                    ArgValue::Value(Value::from(self))
                }
            }
        )*
    };
}

value_args!(Value, i32, i64, u32, u64, f64, bool, String, &str);

/// Arguments of one invocation: positional, keyword, an `inputs` list, and
/// pure ordering dependencies (`after`) whose values are not passed on.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<ArgValue>,
    pub keyword: BTreeMap<String, ArgValue>,
    pub inputs: Vec<ArgValue>,
    pub after: Vec<AppFuture>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl IntoArg) -> Self {
        self.positional.push(value.into_arg());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl IntoArg) -> Self {
        self.keyword.insert(name.to_string(), value.into_arg());
        self
    }

    pub fn input(mut self, value: impl IntoArg) -> Self {
        self.inputs.push(value.into_arg());
        self
    }

    pub fn after(mut self, future: &AppFuture) -> Self {
        self.after.push(future.clone());
        self
    }

    /// Distinct futures this invocation waits on, in first-seen order.
    pub fn dependencies(&self) -> Vec<AppFuture> {
        let mut seen: BTreeSet<TaskId> = BTreeSet::new();
        let mut deps = Vec::new();

        let slots = self
            .positional
            .iter()
            .chain(self.keyword.values())
            .chain(self.inputs.iter())
            .filter_map(ArgValue::dependency)
            .chain(self.after.iter());

        for future in slots {
            if seen.insert(future.task_id()) {
                deps.push(future.clone());
            }
        }
        deps
    }
}

/// Arguments with every future replaced by its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedArgs {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
    pub inputs: Vec<Value>,
}

impl ResolvedArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    pub fn at(&self, idx: usize) -> Option<&Value> {
        self.positional.get(idx)
    }

    /// Keyword argument as i64, for the common numeric case.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }
}

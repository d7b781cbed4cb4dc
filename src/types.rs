// src/types.rs

//! Small shared types: task identifiers, executor hints and duration parsing.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

/// Identifier handed out by the kernel at submission time, in submission order.
pub type TaskId = u64;

/// Dynamic value flowing between apps.
pub type Value = serde_json::Value;

/// Boxed future returned by the object-safe backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where a task would like to run.
///
/// - `Default`: the kernel's configured default executor.
/// - `Named`: exactly this executor.
/// - `AnyOf`: one of these executors, picked at random at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(untagged)]
pub enum ExecutorHint {
    #[default]
    #[serde(skip)]
    Default,
    Named(String),
    AnyOf(Vec<String>),
}

impl ExecutorHint {
    /// Names explicitly referenced by this hint (empty for `Default`).
    pub fn names(&self) -> Vec<&str> {
        match self {
            ExecutorHint::Default => Vec::new(),
            ExecutorHint::Named(name) => vec![name.as_str()],
            ExecutorHint::AnyOf(names) => names.iter().map(|s| s.as_str()).collect(),
        }
    }
}

impl From<&str> for ExecutorHint {
    fn from(name: &str) -> Self {
        ExecutorHint::Named(name.to_string())
    }
}

impl From<String> for ExecutorHint {
    fn from(name: String) -> Self {
        ExecutorHint::Named(name)
    }
}

/// Parse a duration string.
///
/// Accepts either a number with a unit suffix (`"500ms"`, `"3s"`, `"10m"`,
/// `"2h"`) or a scheduler-style walltime (`"HH:MM:SS"` / `"MM:SS"`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    if s.contains(':') {
        return parse_walltime(s);
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn parse_walltime(s: &str) -> Result<Duration, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid walltime '{}'; expected HH:MM:SS", s));
    }

    let mut secs: u64 = 0;
    for part in &parts {
        let n: u64 = part
            .parse()
            .map_err(|e| format!("invalid walltime component '{}': {}", part, e))?;
        secs = secs * 60 + n;
    }
    Ok(Duration::from_secs(secs))
}

/// Render a duration as `HH:MM:SS`, the format batch schedulers expect.
pub fn format_walltime(d: Duration) -> String {
    let total = d.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

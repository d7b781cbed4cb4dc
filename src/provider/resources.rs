// src/provider/resources.rs

use std::time::Duration;

use serde::Serialize;

use crate::types::format_walltime;

/// Resources requested for every job of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Default walltime; a task's own walltime takes precedence.
    pub walltime: Option<Duration>,
    pub nodes: u32,
    pub tasks_per_node: u32,
    pub queue: Option<String>,
    pub account: Option<String>,
    /// Extra scheduler directives, inserted verbatim into the script.
    pub scheduler_options: Option<String>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            walltime: None,
            nodes: 1,
            tasks_per_node: 1,
            queue: None,
            account: None,
            scheduler_options: None,
        }
    }
}

impl ResourceSpec {
    /// The walltime that applies to one job.
    pub fn effective_walltime(&self, task_walltime: Option<Duration>) -> Option<Duration> {
        task_walltime.or(self.walltime)
    }

    /// Template context for one job.
    pub fn context<'a>(&'a self, job_name: &'a str, walltime: Option<Duration>) -> JobContext<'a> {
        JobContext {
            job_name,
            walltime: self.effective_walltime(walltime).map(format_walltime),
            nodes: self.nodes,
            tasks_per_node: self.tasks_per_node,
            queue: self.queue.as_deref(),
            account: self.account.as_deref(),
            scheduler_options: self.scheduler_options.as_deref(),
        }
    }
}

/// Values visible to submit script templates.
#[derive(Debug, Clone, Serialize)]
pub struct JobContext<'a> {
    pub job_name: &'a str,
    /// `HH:MM:SS`.
    pub walltime: Option<String>,
    pub nodes: u32,
    pub tasks_per_node: u32,
    pub queue: Option<&'a str>,
    pub account: Option<&'a str>,
    pub scheduler_options: Option<&'a str>,
}

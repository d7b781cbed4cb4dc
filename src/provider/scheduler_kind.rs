// src/provider/scheduler_kind.rs

//! Per-scheduler commands and output parsing.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::channel::CommandOutput;
use crate::provider::job::{JobId, JobState};
use crate::provider::templates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Slurm,
    Condor,
    Torque,
    Cobalt,
    /// Background process on the channel's host.
    Local,
}

static SLURM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"));
static CONDOR_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"submitted to cluster (\d+)").expect("valid regex"));
static TORQUE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+[\w.\-\[\]]*)\s*$").expect("valid regex"));
static NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s*$").expect("valid regex"));
static TORQUE_STATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"job_state\s*=\s*(\w)").expect("valid regex"));

fn quote(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

impl SchedulerKind {
    pub fn default_template(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => templates::SLURM_TEMPLATE,
            SchedulerKind::Condor => templates::CONDOR_TEMPLATE,
            SchedulerKind::Torque => templates::TORQUE_TEMPLATE,
            SchedulerKind::Cobalt => templates::COBALT_TEMPLATE,
            SchedulerKind::Local => templates::LOCAL_TEMPLATE,
        }
    }

    /// Whether the template renders a submit description that points at a
    /// separate executable script.
    pub fn uses_submit_description(self) -> bool {
        matches!(self, SchedulerKind::Condor)
    }

    /// Command submitting `submit_file` (the rendered template).
    pub fn submit_command(self, submit_file: &str) -> String {
        let f = quote(submit_file);
        match self {
            SchedulerKind::Slurm => format!("sbatch {f}"),
            SchedulerKind::Condor => format!("condor_submit {f}"),
            SchedulerKind::Torque => format!("qsub {f}"),
            SchedulerKind::Cobalt => format!("chmod +x {f} && qsub {f}"),
            SchedulerKind::Local => format!("nohup sh {f} > /dev/null 2>&1 & echo $!"),
        }
    }

    /// Extract the job id from the submit command's stdout.
    pub fn parse_job_id(self, stdout: &str) -> Option<JobId> {
        let re: &Regex = match self {
            SchedulerKind::Slurm => &SLURM_ID,
            SchedulerKind::Condor => &CONDOR_ID,
            SchedulerKind::Torque => &TORQUE_ID,
            SchedulerKind::Cobalt | SchedulerKind::Local => &NUMERIC_ID,
        };
        re.captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| JobId(m.as_str().to_string()))
    }

    pub fn status_command(self, job: &JobId) -> String {
        let id = quote(job.as_str());
        match self {
            SchedulerKind::Slurm => format!("squeue --noheader --format='%t %r' --job {id}"),
            SchedulerKind::Condor => format!("condor_q {id} -af JobStatus"),
            SchedulerKind::Torque => format!("qstat -f {id}"),
            SchedulerKind::Cobalt => format!("qstat {id}"),
            SchedulerKind::Local => format!("ps -p {id} -o stat="),
        }
    }

    pub fn cancel_command(self, job: &JobId) -> String {
        let id = quote(job.as_str());
        match self {
            SchedulerKind::Slurm => format!("scancel {id}"),
            SchedulerKind::Condor => format!("condor_rm {id}"),
            SchedulerKind::Torque | SchedulerKind::Cobalt => format!("qdel {id}"),
            SchedulerKind::Local => format!("kill {id}"),
        }
    }

    /// Map the status command's output to a [`JobState`].
    ///
    /// A job the scheduler no longer knows about has left the queue and is
    /// `Done`; the exit-code file decides whether it succeeded. A status
    /// command that failed for any other reason is `Unknown`.
    pub fn parse_status(self, job: &JobId, out: &CommandOutput) -> JobState {
        match self {
            SchedulerKind::Slurm => parse_slurm(out),
            SchedulerKind::Condor => parse_condor(out),
            SchedulerKind::Torque => parse_torque(out),
            SchedulerKind::Cobalt => parse_cobalt(job, out),
            SchedulerKind::Local => parse_ps(out),
        }
    }
}

fn parse_slurm(out: &CommandOutput) -> JobState {
    if !out.success() {
        return if out.stderr.contains("Invalid job id") {
            JobState::Done
        } else {
            JobState::Unknown
        };
    }

    let line = out.stdout.trim();
    if line.is_empty() {
        return JobState::Done;
    }
    let mut parts = line.split_whitespace();
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default();

    match code {
        "PD" if reason.contains("JobHeld") => JobState::Held,
        "PD" | "CF" => JobState::Queued,
        "R" | "CG" => JobState::Running,
        "S" | "ST" | "RH" | "RS" => JobState::Held,
        "CD" => JobState::Done,
        "F" | "NF" | "CA" | "TO" | "OOM" | "BF" | "PR" | "DL" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

fn parse_condor(out: &CommandOutput) -> JobState {
    if !out.success() {
        return JobState::Unknown;
    }
    match out.stdout.trim() {
        "" => JobState::Done,
        "1" => JobState::Queued,
        "2" | "6" => JobState::Running,
        "3" => JobState::Failed,
        "4" => JobState::Done,
        "5" | "7" => JobState::Held,
        _ => JobState::Unknown,
    }
}

fn parse_torque(out: &CommandOutput) -> JobState {
    if !out.success() {
        return if out.stderr.contains("Unknown Job Id") {
            JobState::Done
        } else {
            JobState::Unknown
        };
    }
    let Some(state) = TORQUE_STATE
        .captures(&out.stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    else {
        return JobState::Unknown;
    };
    match state {
        "Q" => JobState::Queued,
        "R" | "E" => JobState::Running,
        "H" | "S" | "W" | "T" => JobState::Held,
        "C" => JobState::Done,
        _ => JobState::Unknown,
    }
}

fn parse_cobalt(job: &JobId, out: &CommandOutput) -> JobState {
    if !out.success() {
        return JobState::Unknown;
    }
    let row = out
        .stdout
        .lines()
        .find(|l| l.split_whitespace().next() == Some(job.as_str()));
    let Some(row) = row else {
        return JobState::Done;
    };
    let lower = row.to_lowercase();
    if lower.contains("hold") {
        JobState::Held
    } else if lower.contains("queued") {
        JobState::Queued
    } else if lower.contains("running") || lower.contains("starting") || lower.contains("exiting")
    {
        JobState::Running
    } else {
        JobState::Unknown
    }
}

fn parse_ps(out: &CommandOutput) -> JobState {
    let stat = out.stdout.trim();
    if stat.is_empty() {
        // `ps -p` exits 1 once the process is gone.
        return JobState::Done;
    }
    match stat.chars().next() {
        Some('T') => JobState::Held,
        Some('Z') => JobState::Done,
        Some(_) => JobState::Running,
        None => JobState::Unknown,
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Condor => "condor",
            SchedulerKind::Torque => "torque",
            SchedulerKind::Cobalt => "cobalt",
            SchedulerKind::Local => "local",
        };
        f.write_str(s)
    }
}

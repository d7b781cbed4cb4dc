// src/channel/mod.rs

//! How a provider reaches the machine where jobs are submitted.
//!
//! - [`local`] runs commands on this host.
//! - [`ssh`] runs them on a remote login node over one reused SSH session.
//!
//! Transport failures are [`ChannelError`]s, kept apart from the exit code
//! of the command itself.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

use crate::errors::ChannelError;
use crate::types::BoxFuture;

pub mod local;
pub mod ssh;

pub use local::LocalChannel;
pub use ssh::SshChannel;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command execution and file transfer against one execution target.
pub trait Channel: Send + Sync + std::fmt::Debug {
    /// Short label for logs (`local`, `ssh:host`).
    fn label(&self) -> String;

    /// Run `cmd` through the target's shell.
    fn execute<'a>(&'a self, cmd: &'a str) -> BoxFuture<'a, Result<CommandOutput, ChannelError>>;

    fn push_file<'a>(
        &'a self,
        local: &'a Path,
        remote: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>>;

    fn pull_file<'a>(
        &'a self,
        remote: &'a Path,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>>;

    /// Tear the session down; the next call opens a fresh one.
    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>>;
}

/// Run a program to completion and capture its output.
pub(crate) async fn run_process(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CommandOutput, ChannelError> {
    trace!(program, ?args, "running process");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| ChannelError::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

// src/channel/local.rs

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::channel::{run_process, Channel, CommandOutput};
use crate::errors::ChannelError;
use crate::types::BoxFuture;

/// Runs commands on this host with `sh -c`; file transfer is a plain copy.
#[derive(Debug, Clone, Default)]
pub struct LocalChannel {
    cwd: Option<PathBuf>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`; relative target paths are taken
    /// relative to it as well.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(dir.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.cwd {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Channel for LocalChannel {
    fn label(&self) -> String {
        "local".to_string()
    }

    fn execute<'a>(&'a self, cmd: &'a str) -> BoxFuture<'a, Result<CommandOutput, ChannelError>> {
        Box::pin(async move {
            let args = vec!["-c".to_string(), cmd.to_string()];
            run_process("sh", &args, self.cwd.as_deref()).await
        })
    }

    fn push_file<'a>(
        &'a self,
        local: &'a Path,
        remote: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move { copy_file(local, &self.resolve(remote)).await })
    }

    fn pull_file<'a>(
        &'a self,
        remote: &'a Path,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move { copy_file(&self.resolve(remote), local).await })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async { Ok(()) })
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), ChannelError> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| ChannelError::Transfer {
            from: from.display().to_string(),
            to: to.display().to_string(),
            message: e.to_string(),
        })?;
    debug!(from = %from.display(), to = %to.display(), "copied file");
    Ok(())
}

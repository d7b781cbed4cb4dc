// src/channel/ssh.rs

//! SSH channel over the system `ssh` / `scp` binaries.
//!
//! One ControlMaster session per channel is opened on first use and every
//! command multiplexes over it. Each channel has its own control socket, so
//! closing one never tears down another channel's session to the same host.
//! Commands are serialised with an async mutex.
//! An exit code of 255 from `ssh` means the transport failed rather than the
//! command: the session is torn down and reopened on the next call.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{run_process, Channel, CommandOutput};
use crate::errors::ChannelError;
use crate::types::BoxFuture;

/// Exit code `ssh` uses for its own (connection) errors.
const SSH_TRANSPORT_FAILURE: i32 = 255;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
struct Session {
    open: bool,
}

#[derive(Debug)]
pub struct SshChannel {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    control_path: PathBuf,
    session: Mutex<Session>,
}

impl SshChannel {
    pub fn new(host: impl Into<String>, user: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            user,
            port,
            control_path: std::env::temp_dir().join(format!(
                "dagkernel-ssh-{}-{}",
                std::process::id(),
                NEXT_SOCKET.fetch_add(1, Ordering::Relaxed)
            )),
            session: Mutex::new(Session::default()),
        }
    }

    /// Control socket of this channel's master connection.
    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Options shared by every `ssh` invocation on this channel.
    fn common_opts(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        if let Some(port) = self.port {
            opts.push("-p".to_string());
            opts.push(port.to_string());
        }
        opts
    }

    fn scp_opts(&self) -> Vec<String> {
        let mut opts = vec![
            "-q".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        if let Some(port) = self.port {
            opts.push("-P".to_string());
            opts.push(port.to_string());
        }
        opts
    }

    async fn ensure_open(&self, session: &mut Session) -> Result<(), ChannelError> {
        if session.open {
            return Ok(());
        }

        let mut args = self.common_opts();
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-fN".to_string(),
            self.target(),
        ]);

        let out = run_process("ssh", &args, None).await?;
        if !out.success() {
            return Err(ChannelError::Transport {
                host: self.host.clone(),
                message: out.stderr.trim().to_string(),
            });
        }

        info!(host = %self.host, "ssh session opened");
        session.open = true;
        Ok(())
    }

    async fn reset(&self, session: &mut Session) {
        warn!(host = %self.host, "ssh transport failed; resetting session");
        self.exit_master().await;
        session.open = false;
    }

    async fn exit_master(&self) {
        let mut args = self.common_opts();
        args.extend(["-O".to_string(), "exit".to_string(), self.target()]);
        if let Err(e) = run_process("ssh", &args, None).await {
            debug!(host = %self.host, error = %e, "closing ssh master failed");
        }
    }

    /// Run `scp` with one side on the remote host.
    async fn transfer(&self, from: String, to: String) -> Result<(), ChannelError> {
        let mut session = self.session.lock().await;
        self.ensure_open(&mut session).await?;

        let mut args = self.scp_opts();
        args.push(from.clone());
        args.push(to.clone());

        let out = run_process("scp", &args, None).await?;
        if out.exit_code == SSH_TRANSPORT_FAILURE {
            self.reset(&mut session).await;
        }
        if !out.success() {
            return Err(ChannelError::Transfer {
                from,
                to,
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn remote_spec(&self, path: &Path) -> String {
        format!("{}:{}", self.target(), path.display())
    }
}

impl Channel for SshChannel {
    fn label(&self) -> String {
        format!("ssh:{}", self.host)
    }

    fn execute<'a>(&'a self, cmd: &'a str) -> BoxFuture<'a, Result<CommandOutput, ChannelError>> {
        Box::pin(async move {
            let mut session = self.session.lock().await;
            self.ensure_open(&mut session).await?;

            let mut args = self.common_opts();
            args.push(self.target());
            args.push("--".to_string());
            args.push(cmd.to_string());

            let out = run_process("ssh", &args, None).await?;
            if out.exit_code == SSH_TRANSPORT_FAILURE {
                self.reset(&mut session).await;
                return Err(ChannelError::Transport {
                    host: self.host.clone(),
                    message: out.stderr.trim().to_string(),
                });
            }

            debug!(host = %self.host, exit_code = out.exit_code, "remote command finished");
            Ok(out)
        })
    }

    fn push_file<'a>(
        &'a self,
        local: &'a Path,
        remote: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            self.transfer(local.display().to_string(), self.remote_spec(remote))
                .await
        })
    }

    fn pull_file<'a>(
        &'a self,
        remote: &'a Path,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.transfer(self.remote_spec(remote), local.display().to_string())
                .await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            let mut session = self.session.lock().await;
            if session.open {
                self.exit_master().await;
                session.open = false;
                info!(host = %self.host, "ssh session closed");
            }
            Ok(())
        })
    }
}

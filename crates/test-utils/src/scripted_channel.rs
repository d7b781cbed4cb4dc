use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dagkernel::channel::{Channel, CommandOutput};
use dagkernel::errors::ChannelError;
use dagkernel::types::BoxFuture;

type Reply = Result<CommandOutput, ChannelError>;

struct Rule {
    prefix: String,
    /// Replies handed out in order; the last one repeats.
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    commands: Vec<String>,
    pushed: Vec<(PathBuf, PathBuf)>,
    pulled: Vec<(PathBuf, PathBuf)>,
    closed: usize,
}

/// A [`Channel`] answering commands from a script instead of a shell.
///
/// Commands are matched against rule prefixes in the order the rules were
/// added; an unmatched command succeeds with empty output. Pulled files are
/// created empty at the local path so staging code finds them.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for ScriptedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptedChannel")
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: code,
    }
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `replies`, in order.
    pub fn on(self, prefix: &str, replies: Vec<CommandOutput>) -> Self {
        self.on_results(prefix, replies.into_iter().map(Ok).collect())
    }

    pub fn on_results(self, prefix: &str, replies: Vec<Reply>) -> Self {
        self.state.lock().unwrap().rules.push(Rule {
            prefix: prefix.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn pushed(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn pulled(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().pulled.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn reply(&self, cmd: &str) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.commands.push(cmd.to_string());
        let Some(rule) = state.rules.iter_mut().find(|r| cmd.starts_with(&r.prefix)) else {
            return Ok(ok(""));
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap_or_else(|| Ok(ok("")))
        } else {
            rule.replies.front().cloned().unwrap_or_else(|| Ok(ok("")))
        }
    }
}

impl Channel for ScriptedChannel {
    fn label(&self) -> String {
        "scripted".to_string()
    }

    fn execute<'a>(&'a self, cmd: &'a str) -> BoxFuture<'a, Result<CommandOutput, ChannelError>> {
        Box::pin(async move { self.reply(cmd) })
    }

    fn push_file<'a>(
        &'a self,
        local: &'a Path,
        remote: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .pushed
                .push((local.to_path_buf(), remote.to_path_buf()));
            Ok(())
        })
    }

    fn pull_file<'a>(
        &'a self,
        remote: &'a Path,
        local: &'a Path,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .pulled
                .push((remote.to_path_buf(), local.to_path_buf()));
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(local, b"")?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.state.lock().unwrap().closed += 1;
            Ok(())
        })
    }
}

//! # Template Runtime
//!
//! Owns one template's lifecycle: the start command that defines "the
//! template is running," the Filesystem Service, and the Command Supervisor
//! for peer-issued `ExecCmd`s. The template moves through three states —
//! waiting, running, done — and resolves "done" exactly once, however it got
//! there (clean exit, spawn failure, or an empty start command). The start
//! command is split on whitespace with no quoting support: templates are
//! expected to supply a single bare command.
//!
//! The start command runs outside the Command Supervisor's registry: it is
//! not visible to `ListRunningCmds` and cannot be targeted by a peer's
//! `KillCmd`, only by the agent's own shutdown path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

use crate::command::CommandSupervisor;
use crate::fs::Filesystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateState {
    Waiting,
    Running,
    Done,
}

/// A template's lifecycle plus its filesystem and command-execution surface.
///
/// Cheaply cloneable: every clone shares the same state, start-command
/// handle, and done signal.
#[derive(Clone)]
pub struct Template {
    pub fs: Arc<Filesystem>,
    pub commands: CommandSupervisor,
    root_dir: PathBuf,
    state: Arc<RwLock<TemplateState>>,
    start_child: Arc<Mutex<Option<Child>>>,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
    done_fired: Arc<AtomicBool>,
}

impl Template {
    pub fn new(fs: Filesystem, commands: CommandSupervisor, root_dir: PathBuf) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            fs: Arc::new(fs),
            commands,
            root_dir,
            state: Arc::new(RwLock::new(TemplateState::Waiting)),
            start_child: Arc::new(Mutex::new(None)),
            done_tx: Arc::new(done_tx),
            done_rx,
            done_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn state(&self) -> TemplateState {
        *self.state.read().await
    }

    /// Parse `start_cmd` by whitespace and launch it as the template's
    /// foreground process. An empty command marks the template done
    /// immediately rather than spawning nothing and waiting forever.
    /// Idempotent: a call while already `Running` is a no-op, so a repeated
    /// start request can't spawn a second process and leak the first.
    pub async fn start(&self, start_cmd: &str) {
        if *self.state.read().await == TemplateState::Running {
            return;
        }
        *self.state.write().await = TemplateState::Running;

        let mut parts = start_cmd.split_whitespace();
        let program = match parts.next() {
            Some(program) => program,
            None => {
                warn!("start command is empty, marking template done");
                self.mark_done().await;
                return;
            }
        };
        let args: Vec<&str> = parts.collect();

        let child = match TokioCommand::new(program).args(&args).current_dir(&self.root_dir).spawn() {
            Ok(child) => child,
            Err(source) => {
                warn!(error = %source, command = start_cmd, "failed to start template command");
                self.mark_done().await;
                return;
            }
        };

        *self.start_child.lock().await = Some(child);

        let handle = self.clone();
        tokio::spawn(async move {
            let status = {
                let mut guard = handle.start_child.lock().await;
                match guard.as_mut() {
                    Some(child) => child.wait().await,
                    None => return,
                }
            };
            match status {
                Ok(status) => info!(%status, "template start command exited"),
                Err(source) => warn!(error = %source, "failed to wait on template start command"),
            }
            handle.mark_done().await;
        });
    }

    /// Kill the start command, if it is still running.
    pub async fn stop(&self) {
        if let Some(child) = self.start_child.lock().await.as_mut() {
            let _ = child.kill().await;
        }
    }

    /// Resolve once, the first time it's called; further calls are no-ops.
    async fn mark_done(&self) {
        if self.done_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write().await = TemplateState::Done;
        let _ = self.done_tx.send(true);
    }

    /// Resolves once the template reaches `Done`. Safe to call before or
    /// after it already has.
    pub async fn wait_done(&self) {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_start_command_marks_done_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _fs_events) = Filesystem::new(dir.path()).unwrap();
        let (commands, _cmd_events) = CommandSupervisor::new(dir.path().to_path_buf());
        let template = Template::new(fs, commands, dir.path().to_path_buf());

        template.start("").await;
        template.wait_done().await;
        assert_eq!(template.state().await, TemplateState::Done);
    }

    #[tokio::test]
    async fn start_then_wait_done_resolves_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _fs_events) = Filesystem::new(dir.path()).unwrap();
        let (commands, _cmd_events) = CommandSupervisor::new(dir.path().to_path_buf());
        let template = Template::new(fs, commands, dir.path().to_path_buf());

        template.start("true").await;
        assert_eq!(template.state().await, TemplateState::Running);
        template.wait_done().await;
        assert_eq!(template.state().await, TemplateState::Done);
    }
}

//! # Command Supervisor
//!
//! Runs shell commands on behalf of the Runner and tracks them by an
//! execution ID the Runner assigns, streaming each one's stdout/stderr line
//! by line and reporting its exit.
//!
//! A second `ExecCmd` for an execution ID already running kills the existing
//! command before starting the new one. Each execution owns independent
//! output/exit channels, so replacing a running command can't race with
//! delivery of its predecessor's output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// A line of output, or a completed exit, reported for one execution.
#[derive(Debug, Clone)]
pub enum CommandEvent {
    Output { execution_id: String, stdout: String, stderr: String },
    Exit { execution_id: String, error: Option<String> },
}

struct RunningCommand {
    started_at: i64,
    kill_tx: mpsc::Sender<()>,
    // Distinguishes this entry from whatever later gets inserted under the
    // same execution ID, so a delayed cleanup can't remove a replacement.
    generation: u64,
}

/// Tracks every command currently running under this template and lets
/// callers start, kill, or enumerate them.
#[derive(Clone)]
pub struct CommandSupervisor {
    working_dir: PathBuf,
    commands: Arc<RwLock<HashMap<String, RunningCommand>>>,
    events_tx: mpsc::Sender<CommandEvent>,
    next_generation: Arc<AtomicU64>,
}

impl CommandSupervisor {
    pub fn new(working_dir: PathBuf) -> (Self, mpsc::Receiver<CommandEvent>) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        (
            Self {
                working_dir,
                commands: Arc::new(RwLock::new(HashMap::new())),
                events_tx,
                next_generation: Arc::new(AtomicU64::new(0)),
            },
            events_rx,
        )
    }

    /// Start `command` under `execution_id`, replacing any command already
    /// running under the same ID.
    pub async fn exec(&self, command: String, execution_id: String) {
        self.kill(&execution_id).await;

        let (kill_tx, mut kill_rx) = mpsc::channel(1);
        let started_at = chrono::Utc::now().timestamp_millis();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let mut child = match TokioCommand::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                warn!(execution_id, error = %source, "failed to spawn command");
                let _ = self
                    .events_tx
                    .send(CommandEvent::Exit { execution_id, error: Some(source.to_string()) })
                    .await;
                return;
            }
        };

        self.commands.write().await.insert(execution_id.clone(), RunningCommand { started_at, kill_tx, generation });

        let stdout = child.stdout.take().expect("stdout piped at spawn");
        let stderr = child.stderr.take().expect("stderr piped at spawn");

        let stdout_id = execution_id.clone();
        let stdout_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = CommandEvent::Output { execution_id: stdout_id.clone(), stdout: line, stderr: String::new() };
                if stdout_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let stderr_id = execution_id.clone();
        let stderr_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = CommandEvent::Output { execution_id: stderr_id.clone(), stdout: String::new(), stderr: line };
                if stderr_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let commands = self.commands.clone();
        let events_tx = self.events_tx.clone();
        let exit_id = execution_id.clone();
        tokio::spawn(async move {
            let error = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(format!("command exited with {status}")),
                    Err(source) => Some(source.to_string()),
                },
                _ = kill_rx.recv() => {
                    if let Err(source) = child.kill().await {
                        warn!(execution_id = exit_id.as_str(), error = %source, "failed to kill command");
                    }
                    Some("killed".to_string())
                }
            };

            {
                let mut commands = commands.write().await;
                if commands.get(&exit_id).is_some_and(|cmd| cmd.generation == generation) {
                    commands.remove(&exit_id);
                }
            }
            debug!(execution_id = exit_id.as_str(), ?error, "command finished");
            let _ = events_tx.send(CommandEvent::Exit { execution_id: exit_id, error }).await;
        });
    }

    /// Kill the command running under `execution_id`, if any. No-op if it is
    /// not running (already exited, or never started).
    pub async fn kill(&self, execution_id: &str) {
        if let Some(command) = self.commands.read().await.get(execution_id) {
            let _ = command.kill_tx.send(()).await;
        }
    }

    /// Snapshot of every command currently running: `(execution_id, started_at_millis)`.
    pub async fn running(&self) -> Vec<(String, i64)> {
        self.commands
            .read()
            .await
            .iter()
            .map(|(execution_id, cmd)| (execution_id.clone(), cmd.started_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn echo_reports_output_then_clean_exit() {
        let (supervisor, mut events) = CommandSupervisor::new(std::env::temp_dir());
        supervisor.exec("echo hello".to_string(), "exec-1".to_string()).await;

        let mut saw_output = false;
        let mut saw_exit = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            match event {
                CommandEvent::Output { stdout, .. } if stdout == "hello" => saw_output = true,
                CommandEvent::Exit { error, .. } => {
                    assert!(error.is_none());
                    saw_exit = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_output);
        assert!(saw_exit);
    }

    #[tokio::test]
    async fn kill_terminates_a_running_command() {
        let (supervisor, mut events) = CommandSupervisor::new(std::env::temp_dir());
        supervisor.exec("sleep 30".to_string(), "exec-2".to_string()).await;

        assert_eq!(supervisor.running().await.len(), 1);
        supervisor.kill("exec-2").await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("should exit promptly after kill")
            .expect("channel open");
        assert!(matches!(event, CommandEvent::Exit { error: Some(_), .. }));
        assert!(supervisor.running().await.is_empty());
    }

    #[tokio::test]
    async fn reusing_an_execution_id_kills_the_previous_command() {
        let (supervisor, mut events) = CommandSupervisor::new(std::env::temp_dir());
        supervisor.exec("sleep 30".to_string(), "exec-3".to_string()).await;
        supervisor.exec("echo replaced".to_string(), "exec-3".to_string()).await;

        // Both the killed original and the replacement's own exit report
        // under the same execution ID; the registry never holds two entries
        // for it at once.
        let mut exits = 0;
        while exits < 2 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(CommandEvent::Exit { execution_id, .. })) if execution_id == "exec-3" => {
                    exits += 1;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert_eq!(exits, 2);
    }
}

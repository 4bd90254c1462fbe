//! # Dispatcher
//!
//! The agent's central event loop: subscribes to every inbound message kind
//! on the transport, routes each to the Filesystem Service or Command
//! Supervisor, and forwards filesystem and command events back out over the
//! transport. A single `tokio::select!` loop multiplexes every inbound
//! message kind plus the filesystem and command event streams, rather than
//! one task per kind each closing over its own copy of the connection.

use tokio::sync::mpsc;
use tracing::warn;

use crate::command::CommandEvent;
use crate::fs::item::{FsEvent, FsOp};
use crate::template::Template;
use crate::transport::{Message, MessageData, RunningCommandInfo, UnixSocketTransport};

pub struct Dispatcher {
    transport: UnixSocketTransport,
    template: Template,
}

impl Dispatcher {
    pub fn new(transport: UnixSocketTransport, template: Template) -> Self {
        Self { transport, template }
    }

    /// Run until the transport's inbound channels all close (process
    /// shutdown). Consumes the filesystem and command event streams so every
    /// watcher-observed change and command-output line reaches the Runner.
    pub async fn run(&self, mut fs_events: mpsc::Receiver<FsEvent>, mut cmd_events: mpsc::Receiver<CommandEvent>) {
        let mut create_directory = self.transport.subscribe("CreateDirectory").await;
        let mut write_file = self.transport.subscribe("WriteFile").await;
        let mut get_file = self.transport.subscribe("GetFile").await;
        let mut remove_file = self.transport.subscribe("RemoveFile").await;
        let mut list_dir = self.transport.subscribe("ListDir").await;
        let mut exec_cmd = self.transport.subscribe("ExecCmd").await;
        let mut kill_cmd = self.transport.subscribe("KillCmd").await;
        let mut list_running_cmds = self.transport.subscribe("ListRunningCmds").await;

        loop {
            tokio::select! {
                Some(message) = create_directory.recv() => self.handle_create_directory(message).await,
                Some(message) = write_file.recv() => self.handle_write_file(message).await,
                Some(message) = get_file.recv() => self.handle_get_file(message).await,
                Some(message) = remove_file.recv() => self.handle_remove_file(message).await,
                Some(message) = list_dir.recv() => self.handle_list_dir(message).await,
                Some(message) = exec_cmd.recv() => self.handle_exec_cmd(message).await,
                Some(message) = kill_cmd.recv() => self.handle_kill_cmd(message).await,
                Some(message) = list_running_cmds.recv() => self.handle_list_running_cmds(message).await,
                Some(event) = fs_events.recv() => self.forward_fs_event(event).await,
                Some(event) = cmd_events.recv() => self.forward_command_event(event).await,
                else => {
                    warn!("all dispatcher channels closed, shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_create_directory(&self, message: Message) {
        if let MessageData::CreateDirectory { path } = message.data {
            if let Err(source) = self.template.fs.create_dir(&path) {
                warn!(path, error = %source, "CreateDirectory failed");
            }
        }
    }

    async fn handle_write_file(&self, message: Message) {
        if let MessageData::WriteFile { path, content } = message.data {
            if let Err(source) = self.template.fs.write_file(&path, &content) {
                warn!(path, error = %source, "WriteFile failed");
            }
        }
    }

    async fn handle_get_file(&self, message: Message) {
        if let MessageData::GetFile { path } = message.data {
            match self.template.fs.get_file(&path) {
                Ok(content) => {
                    let _ = self.transport.send(MessageData::FileContent { path, content }).await;
                }
                Err(source) => warn!(path, error = %source, "GetFile failed"),
            }
        }
    }

    async fn handle_remove_file(&self, message: Message) {
        if let MessageData::RemoveFile { path } = message.data {
            if let Err(source) = self.template.fs.remove(&path) {
                warn!(path, error = %source, "RemoveFile failed");
            }
        }
    }

    async fn handle_list_dir(&self, message: Message) {
        if let MessageData::ListDir { path } = message.data {
            match self.template.fs.list_dir(&path) {
                Ok(content) => {
                    let _ = self.transport.send(MessageData::DirContent { dir_path: path, content }).await;
                }
                Err(source) => warn!(path, error = %source, "ListDir failed"),
            }
        }
    }

    async fn handle_exec_cmd(&self, message: Message) {
        if let MessageData::ExecCmd { command, execution_id } = message.data {
            self.template.commands.exec(command, execution_id).await;
        }
    }

    async fn handle_kill_cmd(&self, message: Message) {
        if let MessageData::KillCmd { execution_id } = message.data {
            self.template.commands.kill(&execution_id).await;
        }
    }

    async fn handle_list_running_cmds(&self, _message: Message) {
        let running = self.template.commands.running().await;
        let commands = running
            .into_iter()
            .map(|(execution_id, started_at)| RunningCommandInfo { execution_id, started_at })
            .collect();
        let took_at = chrono::Utc::now().timestamp_millis();
        let _ = self.transport.send(MessageData::RunningCmds { took_at, commands }).await;
    }

    async fn forward_fs_event(&self, event: FsEvent) {
        let data = match event.op {
            FsOp::Create => MessageData::FSEventCreate { path: event.path, kind: event.kind },
            FsOp::Write => MessageData::FSEventWrite { path: event.path },
            FsOp::Remove => MessageData::FSEventRemove { path: event.path, kind: event.kind },
        };
        let _ = self.transport.send(data).await;
    }

    async fn forward_command_event(&self, event: CommandEvent) {
        let data = match event {
            CommandEvent::Output { execution_id, stdout, stderr } => MessageData::CmdOut { execution_id, stdout, stderr },
            CommandEvent::Exit { execution_id, error } => {
                MessageData::CmdExit { execution_id, error_message: error.unwrap_or_default() }
            }
        };
        let _ = self.transport.send(data).await;
    }
}

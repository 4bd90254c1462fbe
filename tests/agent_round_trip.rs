//! End-to-end tests driving the agent's public surface against a fake Runner:
//! a bare `UnixListener` that reads delimited JSON records and writes its
//! own, exercising a whole client/server pair rather than mocking either
//! side.

use std::time::Duration;

use tinit::command::CommandSupervisor;
use tinit::dispatcher::Dispatcher;
use tinit::fs::Filesystem;
use tinit::template::Template;
use tinit::transport::{MessageData, UnixSocketTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

const DELIMITER: u8 = 0x0C;

/// Minimal fake-Runner harness: accepts one connection and exposes raw
/// send/receive of delimited JSON records.
struct FakeRunner {
    stream: UnixStream,
}

impl FakeRunner {
    async fn send(&mut self, data: &MessageData) {
        let message = serde_json::json!({ "type": "message", "data": data });
        let mut bytes = serde_json::to_vec(&message).unwrap();
        bytes.push(DELIMITER);
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn recv(&mut self) -> MessageData {
        let mut record = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == DELIMITER {
                break;
            }
            record.push(byte[0]);
        }
        let value: serde_json::Value = serde_json::from_slice(&record).unwrap();
        serde_json::from_value(value["data"].clone()).unwrap()
    }

    async fn recv_matching(&mut self, predicate: impl Fn(&MessageData) -> bool) -> MessageData {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let data = self.recv().await;
                if predicate(&data) {
                    return data;
                }
            }
        })
        .await
        .expect("expected message not received before timeout")
    }
}

/// Boots the transport, filesystem, command supervisor, template, and
/// dispatcher against a temp root dir, returning the fake Runner's end of
/// the socket once the agent has announced readiness. The socket lives
/// outside `root_dir` so a `ListDir("/")` sees only what a test wrote.
async fn start_agent(socket_dir: &std::path::Path, root_dir: &std::path::Path, start_cmd: &str) -> FakeRunner {
    let socket_path = socket_dir.join("runner.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let (fs, fs_events) = Filesystem::new(root_dir).unwrap();
    let (commands, cmd_events) = CommandSupervisor::new(root_dir.to_path_buf());
    let template = Template::new(fs, commands, root_dir.to_path_buf());

    let (transport, mut ready_rx, _error_rx) = UnixSocketTransport::new(&socket_path);
    let dial_transport = transport.clone();
    tokio::spawn(async move { dial_transport.dial_and_read().await });

    let (stream, _addr) = listener.accept().await.unwrap();
    ready_rx.recv().await.unwrap();

    template.start(start_cmd).await;
    transport.send_ready().await.unwrap();

    let dispatcher = Dispatcher::new(transport, template);
    tokio::spawn(async move { dispatcher.run(fs_events, cmd_events).await });

    FakeRunner { stream }
}

#[tokio::test]
async fn readiness_is_announced_before_anything_else() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "true").await;

    let first = runner.recv().await;
    assert!(matches!(first, MessageData::Status { status } if status == "Ready"));
}

#[tokio::test]
async fn exec_cmd_echoes_stdout_then_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "sleep 5").await;
    let _ready = runner.recv().await;

    runner
        .send(&MessageData::ExecCmd { command: "echo hi".to_string(), execution_id: "exec-a".to_string() })
        .await;

    let output = runner
        .recv_matching(|data| matches!(data, MessageData::CmdOut { execution_id, .. } if execution_id == "exec-a"))
        .await;
    match output {
        MessageData::CmdOut { stdout, .. } => assert_eq!(stdout, "hi"),
        _ => unreachable!(),
    }

    let exit = runner
        .recv_matching(|data| matches!(data, MessageData::CmdExit { execution_id, .. } if execution_id == "exec-a"))
        .await;
    match exit {
        MessageData::CmdExit { error_message, .. } => assert!(error_message.is_empty()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn list_dir_on_empty_root_reports_no_entries() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "sleep 5").await;
    let _ready = runner.recv().await;

    runner.send(&MessageData::ListDir { path: "/".to_string() }).await;

    let reply = runner.recv_matching(|data| matches!(data, MessageData::DirContent { .. })).await;
    match reply {
        MessageData::DirContent { dir_path, content } => {
            assert_eq!(dir_path, "/");
            assert!(content.is_empty());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn write_file_is_observed_as_a_filesystem_event() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "sleep 5").await;
    let _ready = runner.recv().await;

    runner
        .send(&MessageData::WriteFile { path: "/hello.txt".to_string(), content: "world".to_string() })
        .await;

    let event = runner
        .recv_matching(|data| matches!(data, MessageData::FSEventCreate { path, .. } if path == "/hello.txt")
            || matches!(data, MessageData::FSEventWrite { path } if path == "/hello.txt"))
        .await;
    assert!(matches!(event, MessageData::FSEventCreate { .. } | MessageData::FSEventWrite { .. }));

    assert_eq!(std::fs::read_to_string(root_dir.join("hello.txt")).unwrap(), "world");
}

#[tokio::test]
async fn get_file_on_missing_path_sends_no_reply_and_keeps_connection_open() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "sleep 5").await;
    let _ready = runner.recv().await;

    runner.send(&MessageData::GetFile { path: "/missing.txt".to_string() }).await;

    // No FileContent should arrive for the failed read; the connection stays
    // usable, proven by a follow-up request still getting its normal reply.
    runner.send(&MessageData::ListDir { path: "/".to_string() }).await;
    let reply = runner.recv_matching(|data| matches!(data, MessageData::DirContent { .. })).await;
    match reply {
        MessageData::DirContent { dir_path, content } => {
            assert_eq!(dir_path, "/");
            assert!(content.is_empty());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn kill_cmd_terminates_a_running_execution() {
    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    std::fs::create_dir(&root_dir).unwrap();
    let mut runner = start_agent(dir.path(), &root_dir, "sleep 5").await;
    let _ready = runner.recv().await;

    runner
        .send(&MessageData::ExecCmd { command: "sleep 30".to_string(), execution_id: "exec-b".to_string() })
        .await;
    runner.send(&MessageData::KillCmd { execution_id: "exec-b".to_string() }).await;

    let exit = runner
        .recv_matching(|data| matches!(data, MessageData::CmdExit { execution_id, .. } if execution_id == "exec-b"))
        .await;
    match exit {
        MessageData::CmdExit { error_message, .. } => assert!(!error_message.is_empty()),
        _ => unreachable!(),
    }
}

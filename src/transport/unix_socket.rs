//! # Unix Domain Socket Transport
//!
//! Single-connection IPC transport: the agent dials a Runner-owned Unix
//! socket and keeps one bidirectional stream open for the lifetime of the
//! process, routing each decoded inbound record to its subscribers rather
//! than pairing it with a single synchronous caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use super::{Message, MessageData};
use crate::error::TransportError;

/// The single byte that terminates every record on the wire.
const DELIMITER: u8 = 0x0C;

/// Inbound message kinds the agent accepts from the Runner. Any other
/// `data.type` tag is reported as `TransportError::UnknownKind`.
const INBOUND_KINDS: &[&str] = &[
    "CreateDirectory",
    "WriteFile",
    "GetFile",
    "RemoveFile",
    "ListDir",
    "ExecCmd",
    "KillCmd",
    "ListRunningCmds",
];

/// A subscription returned by [`UnixSocketTransport::subscribe`]: the
/// receiving half of a channel fed every decoded message of one inbound kind.
pub type Subscription = mpsc::Receiver<Message>;

/// Handle to the Unix-domain socket transport.
///
/// Cheaply cloneable: every clone shares the same write half, subscriber
/// table, and error/ready channels, so `subscribe`/`send` can be called
/// concurrently from any task while `dial_and_read` drives the read loop.
#[derive(Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    write_half: Arc<Mutex<Option<OwnedWriteHalf>>>,
    subscribers: Arc<RwLock<HashMap<&'static str, Vec<mpsc::Sender<Message>>>>>,
    ready_tx: mpsc::Sender<()>,
    error_tx: mpsc::Sender<TransportError>,
}

impl UnixSocketTransport {
    /// Create a new transport bound to `socket_path`. Returns the transport
    /// plus the receiving halves of its `ready` and `errors` channels, which
    /// the caller (normally `main`) owns for the life of the process.
    pub fn new(socket_path: impl Into<PathBuf>) -> (Self, mpsc::Receiver<()>, mpsc::Receiver<TransportError>) {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(64);
        let transport = Self {
            socket_path: socket_path.into(),
            write_half: Arc::new(Mutex::new(None)),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            ready_tx,
            error_tx,
        };
        (transport, ready_rx, error_rx)
    }

    /// Register a delivery sink for inbound messages of `kind` (e.g.
    /// `"ExecCmd"`). Returns the receiving end; multiple subscriptions per
    /// kind are allowed, and delivery order between them is unspecified.
    pub async fn subscribe(&self, kind: &'static str) -> Subscription {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.write().await.entry(kind).or_default().push(tx);
        rx
    }

    /// Connect to the configured socket path and run the read loop until the
    /// process exits. Emits exactly one value on `ready` once connected.
    /// Dial failure is fatal to the transport; every other failure is
    /// reported on `errors` and the loop continues.
    pub async fn dial_and_read(&self) {
        let stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(source) => {
                let _ = self
                    .error_tx
                    .send(TransportError::DialFailed { socket_path: self.socket_path.clone(), source })
                    .await;
                return;
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.write_half.lock().await = Some(write_half);
        let _ = self.ready_tx.send(()).await;

        let mut reader = read_half;
        let mut record = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match reader.read_exact(&mut byte).await {
                Ok(()) => {}
                Err(source) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                    let _ = self
                        .error_tx
                        .send(TransportError::ReadEof { socket_path: self.socket_path.clone() })
                        .await;
                    // The peer closed the connection; reading again would
                    // immediately EOF again. Back off instead of spinning.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Err(source) => {
                    let _ = self
                        .error_tx
                        .send(TransportError::ReadFailed { socket_path: self.socket_path.clone(), source })
                        .await;
                    continue;
                }
            }

            if byte[0] == DELIMITER {
                self.handle_record(&record).await;
                record.clear();
                continue;
            }

            record.push(byte[0]);
        }
    }

    /// Parse one completed record and publish it to its subscribers.
    async fn handle_record(&self, buf: &[u8]) {
        let value: serde_json::Value = match serde_json::from_slice(buf) {
            Ok(v) => v,
            Err(source) => {
                let _ = self
                    .error_tx
                    .send(TransportError::ParseFailed { offset: source.column(), source })
                    .await;
                return;
            }
        };

        let kind = value.get("data").and_then(|d| d.get("type")).and_then(|t| t.as_str());
        let kind = match kind {
            Some(k) => k.to_string(),
            None => {
                let source = serde_json::from_value::<Message>(value).unwrap_err();
                let _ = self
                    .error_tx
                    .send(TransportError::ParseFailed { offset: source.column(), source })
                    .await;
                return;
            }
        };

        if !INBOUND_KINDS.contains(&kind.as_str()) {
            let _ = self.error_tx.send(TransportError::UnknownKind { kind }).await;
            return;
        }

        match serde_json::from_value::<Message>(value) {
            Ok(message) => self.publish(message).await,
            Err(source) => {
                let _ = self
                    .error_tx
                    .send(TransportError::ParseFailed { offset: source.column(), source })
                    .await;
            }
        }
    }

    /// Deliver a decoded message to every subscriber of its kind, from a
    /// dedicated task, so a slow subscriber can't starve the reader.
    async fn publish(&self, message: Message) {
        let kind = message.data.kind_name();
        let snapshot = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(kind).cloned().unwrap_or_default()
        };

        if snapshot.is_empty() {
            debug!(kind, "no subscribers for inbound message kind");
            return;
        }

        tokio::spawn(async move {
            for sink in snapshot {
                if sink.send(message.clone()).await.is_err() {
                    debug!("subscriber channel closed, dropping delivery");
                }
            }
        });
    }

    /// Encode `data`, append the delimiter, and write it atomically to the
    /// socket. Safe to call from multiple tasks: the write half is guarded
    /// by a mutex so a partial write can never interleave two records.
    pub async fn send(&self, data: MessageData) -> Result<(), TransportError> {
        let message = Message::new(data);
        let mut bytes = serde_json::to_vec(&message)
            .expect("MessageData serialization is infallible for well-formed agent state");
        bytes.push(DELIMITER);

        let mut guard = self.write_half.lock().await;
        let write_half = guard.as_mut().ok_or_else(|| TransportError::WriteFailed {
            socket_path: self.socket_path.clone(),
            offset: 0,
            source: std::io::Error::new(std::io::ErrorKind::NotConnected, "transport not yet connected"),
        })?;

        match write_half.write_all(&bytes).await {
            Ok(()) => Ok(()),
            Err(source) => {
                let err = TransportError::WriteFailed { socket_path: self.socket_path.clone(), offset: 0, source };
                warn!(error = %err, "failed to write record to Runner socket");
                Err(err)
            }
        }
    }

    /// Convenience wrapper around `send` for the initial `Status = "Ready"`
    /// announcement.
    pub async fn send_ready(&self) -> Result<(), TransportError> {
        self.send(MessageData::Status { status: "Ready".to_string() }).await
    }

    /// Shut the socket down. Any in-flight read on the other clone returns
    /// via EOF.
    pub async fn close(&self) {
        *self.write_half.lock().await = None;
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn readiness_fires_once_then_echo_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("runner.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                stream.read_exact(&mut byte).await.unwrap();
                if byte[0] == DELIMITER {
                    break;
                }
                buf.push(byte[0]);
            }
            buf
        });

        let (transport, mut ready_rx, mut error_rx) = UnixSocketTransport::new(&socket_path);
        let dial_transport = transport.clone();
        tokio::spawn(async move { dial_transport.dial_and_read().await });

        ready_rx.recv().await.expect("ready should fire exactly once");
        assert!(error_rx.try_recv().is_err(), "no errors expected on a clean connect");

        transport.send_ready().await.unwrap();

        let received = server.await.unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.contains("\"type\":\"Status\""));
        assert!(text.contains("\"status\":\"Ready\""));
    }

    #[tokio::test]
    async fn unknown_kind_is_reported_and_does_not_crash_reader() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("runner.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let record = br#"{"type":"message","data":{"type":"NotARealKind","payload":{}}}"#;
            stream.write_all(record).await.unwrap();
            stream.write_all(&[DELIMITER]).await.unwrap();
            // Keep the connection open briefly so the client can read it.
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let (transport, mut ready_rx, mut error_rx) = UnixSocketTransport::new(&socket_path);
        let dial_transport = transport.clone();
        tokio::spawn(async move { dial_transport.dial_and_read().await });

        ready_rx.recv().await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), error_rx.recv())
            .await
            .expect("should receive an error before timeout")
            .expect("channel should still be open");
        assert!(matches!(err, TransportError::UnknownKind { .. }));
    }
}

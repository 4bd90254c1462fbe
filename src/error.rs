//! # Error Taxonomy
//!
//! Typed errors for each concern in the agent: startup-fatal configuration
//! errors, transport-recoverable IPC errors, and per-operation filesystem
//! errors. `anyhow::Result` is still used at call-site boundaries (component
//! constructors, `main`), but the enums here carry the structured context
//! (offsets, offending bytes, socket paths) that logging and peer-facing
//! messages need.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal at startup: a mandatory environment variable is missing or empty.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env '{0}' is empty or unset")]
    MissingVar(&'static str),
}

/// One of the five transport failure kinds the IPC Transport distinguishes.
///
/// Every variant is non-fatal: it is reported on the transport's `errors`
/// channel and the read loop continues, except `DialFailed` which terminates
/// the transport task (there is nothing to read from a socket that never
/// connected).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial Runner socket '{socket_path}': {source}")]
    DialFailed {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read byte from socket '{socket_path}': {source}")]
    ReadFailed {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("EOF while reading from socket '{socket_path}'")]
    ReadEof { socket_path: PathBuf },

    #[error("failed to write {offset} bytes to socket '{socket_path}': {source}")]
    WriteFailed {
        socket_path: PathBuf,
        offset: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse record at byte offset {offset}: {source}")]
    ParseFailed {
        offset: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown message kind '{kind}' in record")]
    UnknownKind { kind: String },
}

/// A virtual path did not start with `/`.
#[derive(Debug, Error)]
#[error("path '{0}' is not rooted: must start with '/'")]
pub struct PathError(pub String);

/// Filesystem-service operation failures, always carrying the offending
/// virtual path for logging.
#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("filesystem operation on '{path}' failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch '{path}': {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },

    #[error("host path '{host_path}' does not lie under root '{root}'")]
    OutsideRoot { host_path: String, root: String },
}

//! # IPC Transport Abstraction and Wire Protocol
//!
//! This module defines the message envelope exchanged with the Runner and
//! the transport that frames, parses, and routes it over a single
//! Unix-domain socket. Records are JSON, framed by a single delimiter byte
//! rather than a length prefix, and keyed by a string `type` tag matched
//! against the Runner's own wire format.
//!
//! ## Framing
//!
//! Records are UTF-8 JSON objects terminated by exactly one form-feed byte
//! (`0x0C`, `'\f'`). There is no length prefix; the reader accumulates bytes
//! until it sees the delimiter, then hands the buffer to the decoder.
//!
//! ## Envelope
//!
//! Every record has the shape
//! `{"type":"message","data":{"type":"<Kind>","payload":{...}}}`. The outer
//! `type` is always the literal string `"message"`; `data.type` selects the
//! payload variant via serde's adjacently-tagged enum representation.

pub mod unix_socket;

use serde::{Deserialize, Serialize};

use crate::fs::item::{FsItem, ItemKind};

pub use unix_socket::{Subscription, UnixSocketTransport};

/// The literal value of the outer envelope's `type` field.
pub const ENVELOPE_KIND: &str = "message";

/// One message as it appears on the wire, inside the envelope's `data` field.
///
/// Inbound variants are sent by the Runner; outbound variants are sent by
/// the agent. Both directions share one enum because they're framed and
/// parsed identically — only the set of variants a given side emits differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MessageData {
    // Inbound (Runner -> agent)
    CreateDirectory {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    GetFile {
        path: String,
    },
    RemoveFile {
        path: String,
    },
    ListDir {
        path: String,
    },
    ExecCmd {
        command: String,
        #[serde(rename = "executionID")]
        execution_id: String,
    },
    KillCmd {
        #[serde(rename = "executionID")]
        execution_id: String,
    },
    ListRunningCmds {},

    // Outbound (agent -> Runner)
    Status {
        status: String,
    },
    FSEventCreate {
        path: String,
        #[serde(rename = "type")]
        kind: ItemKind,
    },
    FSEventWrite {
        path: String,
    },
    FSEventRemove {
        path: String,
        #[serde(rename = "type")]
        kind: ItemKind,
    },
    DirContent {
        #[serde(rename = "dirPath")]
        dir_path: String,
        content: Vec<FsItem>,
    },
    FileContent {
        path: String,
        content: String,
    },
    CmdOut {
        #[serde(rename = "executionID")]
        execution_id: String,
        stdout: String,
        stderr: String,
    },
    CmdExit {
        #[serde(rename = "executionID")]
        execution_id: String,
        #[serde(rename = "error")]
        error_message: String,
    },
    RunningCmds {
        #[serde(rename = "tookAt")]
        took_at: i64,
        commands: Vec<RunningCommandInfo>,
    },
}

impl MessageData {
    /// The `data.type` tag as it appears on the wire, used for subscriber
    /// routing and error context. `serde_json` doesn't expose the tag
    /// directly, so this mirrors the variant names by hand.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MessageData::CreateDirectory { .. } => "CreateDirectory",
            MessageData::WriteFile { .. } => "WriteFile",
            MessageData::GetFile { .. } => "GetFile",
            MessageData::RemoveFile { .. } => "RemoveFile",
            MessageData::ListDir { .. } => "ListDir",
            MessageData::ExecCmd { .. } => "ExecCmd",
            MessageData::KillCmd { .. } => "KillCmd",
            MessageData::ListRunningCmds {} => "ListRunningCmds",
            MessageData::Status { .. } => "Status",
            MessageData::FSEventCreate { .. } => "FSEventCreate",
            MessageData::FSEventWrite { .. } => "FSEventWrite",
            MessageData::FSEventRemove { .. } => "FSEventRemove",
            MessageData::DirContent { .. } => "DirContent",
            MessageData::FileContent { .. } => "FileContent",
            MessageData::CmdOut { .. } => "CmdOut",
            MessageData::CmdExit { .. } => "CmdExit",
            MessageData::RunningCmds { .. } => "RunningCmds",
        }
    }
}

/// A snapshot entry in a `RunningCmds` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningCommandInfo {
    #[serde(rename = "executionID")]
    pub execution_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: i64,
}

/// The full record exchanged over the socket: `{"type":"message","data":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub event: String,
    pub data: MessageData,
}

impl Message {
    pub fn new(data: MessageData) -> Self {
        Self { event: ENVELOPE_KIND.to_string(), data }
    }
}

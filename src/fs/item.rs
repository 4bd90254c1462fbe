//! Filesystem item and event types shared between the Filesystem Service and
//! the wire protocol.

use serde::{Deserialize, Serialize};

/// Whether a filesystem entry is a plain file or a directory.
///
/// Serializes exactly as the wire protocol expects: `"File"` / `"Directory"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    File,
    Directory,
    /// Emitted when the watcher could no longer `stat` the path to recover
    /// its kind by the time the event was translated. Common on `Remove`
    /// (the entry is already gone); possible but rare on `Create` (the
    /// entry was removed again before the watcher could stat it). Never
    /// produced for `Write`, which always reports `File`.
    Unknown,
}

/// One entry in a `list_dir` result: a virtual path tagged with its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub path: String,
}

/// The operation a filesystem change event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    Create,
    Write,
    Remove,
}

/// A single filesystem change, already translated from a host path to a
/// virtual path.
#[derive(Debug, Clone)]
pub struct FsEvent {
    pub op: FsOp,
    pub path: String,
    pub kind: ItemKind,
}

impl FsEvent {
    pub fn create(path: String, kind: ItemKind) -> Self {
        Self { op: FsOp::Create, path, kind }
    }

    pub fn write(path: String) -> Self {
        Self { op: FsOp::Write, path, kind: ItemKind::File }
    }

    pub fn remove(path: String, kind: ItemKind) -> Self {
        Self { op: FsOp::Remove, path, kind }
    }
}

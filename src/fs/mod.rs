//! # Filesystem Service
//!
//! Scopes every virtual path the Runner sends against `root_dir`, performs
//! the requested operation on the host filesystem, and watches `root_dir`
//! recursively so every host-side change is translated into an `FsEvent` and
//! forwarded to subscribers (normally the Dispatcher, which turns each one
//! into an outbound `FSEventCreate`/`FSEventWrite`/`FSEventRemove`).
//!
//! Every virtual path must start with `/`; it's joined onto `root_dir` to
//! produce the host path, and the reverse translation strips `root_dir` back
//! off to produce the virtual path reported in events.

pub mod item;

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{FsError, PathError};
use item::{FsEvent, ItemKind};

/// Directories are created `0755`; a mode without the execute bit would be
/// non-traversable.
const DIRECTORY_MODE: u32 = 0o755;

/// Filesystem access scoped to one root directory, plus a live recursive
/// watch over it.
pub struct Filesystem {
    root_dir: PathBuf,
    // Held only to keep the watcher alive for the lifetime of the service;
    // its event callback runs on a dedicated thread and forwards to `events`.
    _watcher: RecommendedWatcher,
}

impl Filesystem {
    /// Start watching `root_dir` and return a handle plus the receiving end
    /// of its change-event stream.
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<(Self, mpsc::Receiver<FsEvent>), FsError> {
        let root_dir = root_dir.into();
        let (tx, rx) = mpsc::channel(1024);

        let watch_root = root_dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handle_notify_event(&watch_root, event, &tx),
            Err(source) => warn!(error = %source, "filesystem watcher error"),
        })
        .map_err(|source| FsError::Watch { path: root_dir.display().to_string(), source })?;

        watcher
            .watch(&root_dir, RecursiveMode::Recursive)
            .map_err(|source| FsError::Watch { path: root_dir.display().to_string(), source })?;

        Ok((Self { root_dir, _watcher: watcher }, rx))
    }

    /// List the immediate children of a directory.
    pub fn list_dir(&self, virtual_path: &str) -> Result<Vec<item::FsItem>, FsError> {
        let host_path = self.to_host_path(virtual_path)?;
        let mut items = Vec::new();
        let entries = std::fs::read_dir(&host_path).map_err(|source| self.io_err(virtual_path, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| self.io_err(virtual_path, source))?;
            let kind = item_kind_of(&entry.path());
            let child_virtual = self.to_virtual_path(&entry.path())?;
            items.push(item::FsItem { kind, path: child_virtual });
        }
        Ok(items)
    }

    /// Create a directory (and any missing parents) at `virtual_path`.
    pub fn create_dir(&self, virtual_path: &str) -> Result<(), FsError> {
        let host_path = self.to_host_path(virtual_path)?;
        std::fs::create_dir_all(&host_path).map_err(|source| self.io_err(virtual_path, source))?;
        std::fs::set_permissions(&host_path, Permissions::from_mode(DIRECTORY_MODE))
            .map_err(|source| self.io_err(virtual_path, source))?;
        Ok(())
    }

    /// Read a file's entire contents as UTF-8.
    pub fn get_file(&self, virtual_path: &str) -> Result<String, FsError> {
        let host_path = self.to_host_path(virtual_path)?;
        std::fs::read_to_string(&host_path).map_err(|source| self.io_err(virtual_path, source))
    }

    /// Write (creating or truncating) a file's entire contents.
    pub fn write_file(&self, virtual_path: &str, content: &str) -> Result<(), FsError> {
        let host_path = self.to_host_path(virtual_path)?;
        if let Some(parent) = host_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_err(virtual_path, source))?;
        }
        std::fs::write(&host_path, content).map_err(|source| self.io_err(virtual_path, source))
    }

    /// Remove a file or directory (recursively, if it is a directory).
    pub fn remove(&self, virtual_path: &str) -> Result<(), FsError> {
        let host_path = self.to_host_path(virtual_path)?;
        let metadata = std::fs::symlink_metadata(&host_path).map_err(|source| self.io_err(virtual_path, source))?;
        if metadata.is_dir() {
            std::fs::remove_dir_all(&host_path).map_err(|source| self.io_err(virtual_path, source))
        } else {
            std::fs::remove_file(&host_path).map_err(|source| self.io_err(virtual_path, source))
        }
    }

    /// Translate a virtual path (must start with `/`) to an absolute host path.
    fn to_host_path(&self, virtual_path: &str) -> Result<PathBuf, FsError> {
        if !virtual_path.starts_with('/') {
            return Err(PathError(virtual_path.to_string()).into());
        }
        Ok(self.root_dir.join(virtual_path.trim_start_matches('/')))
    }

    /// Translate an absolute host path back to a virtual path rooted at `/`.
    fn to_virtual_path(&self, host_path: &Path) -> Result<String, FsError> {
        let stripped = host_path.strip_prefix(&self.root_dir).map_err(|_| FsError::OutsideRoot {
            host_path: host_path.display().to_string(),
            root: self.root_dir.display().to_string(),
        })?;
        let virtual_path = format!("/{}", stripped.display());
        Ok(virtual_path)
    }

    fn io_err(&self, virtual_path: &str, source: std::io::Error) -> FsError {
        FsError::Io { path: virtual_path.to_string(), source }
    }
}

fn handle_notify_event(root_dir: &Path, event: Event, tx: &mpsc::Sender<FsEvent>) {
    let op = match event.kind {
        EventKind::Create(_) => item::FsOp::Create,
        EventKind::Modify(_) => item::FsOp::Write,
        EventKind::Remove(_) => item::FsOp::Remove,
        _ => return,
    };

    for host_path in event.paths {
        let virtual_path = match host_path.strip_prefix(root_dir) {
            Ok(stripped) => format!("/{}", stripped.display()),
            Err(_) => {
                debug!(path = %host_path.display(), "watcher event outside root, ignoring");
                continue;
            }
        };

        let kind = item_kind_of(&host_path);
        let fs_event = match op {
            item::FsOp::Create => FsEvent::create(virtual_path, kind),
            item::FsOp::Write => FsEvent::write(virtual_path),
            item::FsOp::Remove => FsEvent::remove(virtual_path, kind),
        };

        if tx.blocking_send(fs_event).is_err() {
            debug!("filesystem event channel closed, dropping watcher event");
        }
    }
}

/// Best-effort stat; `Unknown` when the path can no longer be read (the
/// usual case for a `Remove` event, where the entry is already gone).
fn item_kind_of(host_path: &Path) -> ItemKind {
    match std::fs::metadata(host_path) {
        Ok(meta) if meta.is_dir() => ItemKind::Directory,
        Ok(_) => ItemKind::File,
        Err(_) => ItemKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unrooted_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _rx) = Filesystem::new(dir.path()).unwrap();
        let err = fs.get_file("relative/path").unwrap_err();
        assert!(matches!(err, FsError::Path(_)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _rx) = Filesystem::new(dir.path()).unwrap();
        fs.write_file("/greeting.txt", "hello").unwrap();
        assert_eq!(fs.get_file("/greeting.txt").unwrap(), "hello");
    }

    #[test]
    fn create_dir_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _rx) = Filesystem::new(dir.path()).unwrap();
        fs.create_dir("/sub").unwrap();
        let meta = std::fs::metadata(dir.path().join("sub")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, DIRECTORY_MODE);
    }

    #[test]
    fn list_dir_reports_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _rx) = Filesystem::new(dir.path()).unwrap();
        let items = fs.list_dir("/").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, _rx) = Filesystem::new(dir.path()).unwrap();
        fs.write_file("/doomed.txt", "bye").unwrap();
        fs.remove("/doomed.txt").unwrap();
        assert!(fs.get_file("/doomed.txt").is_err());
    }
}

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::filesystem::normalize;
use crate::process::{ResourceKey, ResourceTracker};

/// An open file, owned by the [`HandleRegistry`].
struct OpenHandle {
    id: Uuid,
    file: File,
    writable: bool,
    opened_at: DateTime<Utc>,
}

impl OpenHandle {
    /// Releases the descriptor. Write handles are synced first so that a
    /// failed flush is reported instead of lost.
    fn close(self, path: &Path) -> io::Result<()> {
        let held_ms = (Utc::now() - self.opened_at).num_milliseconds();
        log::debug!(
            "Closing handle {} for {} (held {} ms)",
            self.id,
            path.display(),
            held_ms
        );
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// How a tracked file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Write, truncating any existing content. Creates the file if missing.
    Overwrite,
    /// Write a file that must not exist yet.
    CreateNew,
}

impl Access {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Access::Read => options.read(true),
            Access::Overwrite => options.write(true).create(true).truncate(true),
            Access::CreateNew => options.write(true).create_new(true),
        };
        options
    }

    fn is_write(self) -> bool {
        self != Access::Read
    }
}

/// Snapshot of an open handle, for diagnostics.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandleInfo {
    pub id: String,
    pub path: String,
    pub opened_at: DateTime<Utc>,
}

/// Registry of currently open file handles, keyed by path.
///
/// At most one handle per path is open at a time: opening a path again closes
/// the previous handle first. Paths are normalized before use as keys, so
/// `Work/../a.txt` and `a.txt` name the same handle. Every handle is also registered with the
/// [`ResourceTracker`] so a shutdown releases whatever is still open.
pub struct HandleRegistry {
    open: Mutex<HashMap<PathBuf, OpenHandle>>,
    tracker: Arc<ResourceTracker>,
}

impl HandleRegistry {
    pub fn new(tracker: Arc<ResourceTracker>) -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(HashMap::new()),
            tracker,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, OpenHandle>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens `path` and tracks the handle until the returned guard is closed
    /// or dropped.
    pub fn open(self: &Arc<Self>, path: &Path, access: Access) -> io::Result<TrackedFile> {
        let normalized = normalize(path);
        let path = normalized.as_path();
        if self.close(path) {
            log::debug!("Replaced open handle for {}", path.display());
        }

        let file = access.options().open(path)?;
        let handle = OpenHandle {
            id: Uuid::new_v4(),
            file,
            writable: access.is_write(),
            opened_at: Utc::now(),
        };
        let id = handle.id;
        self.lock().insert(path.to_path_buf(), handle);

        let registry = Arc::downgrade(self);
        let cleanup_path = path.to_path_buf();
        self.tracker
            .register(ResourceKey::File(path.to_path_buf()), move || {
                match registry.upgrade() {
                    Some(registry) => registry
                        .release(&cleanup_path)
                        .unwrap_or(Ok(()))
                        .map_err(|e| e.to_string()),
                    None => Ok(()),
                }
            });

        Ok(TrackedFile {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
            id,
            closed: false,
        })
    }

    /// Removes the handle for `path` from the map and closes it, without
    /// touching the tracker. `None` when nothing was open.
    fn release(&self, path: &Path) -> Option<io::Result<()>> {
        let handle = self.lock().remove(path)?;
        Some(handle.close(path))
    }

    fn release_matching(&self, path: &Path, id: Uuid) -> Option<io::Result<()>> {
        let handle = {
            let mut open = self.lock();
            match open.get(path) {
                Some(handle) if handle.id == id => open.remove(path),
                _ => None,
            }
        }?;
        self.tracker.unregister(&ResourceKey::File(path.to_path_buf()));
        Some(handle.close(path))
    }

    /// Closes and untracks the handle for `path`, if one is open.
    ///
    /// A failure while closing is logged; the handle is forgotten either way.
    /// Returns whether a handle was open.
    pub fn close(&self, path: &Path) -> bool {
        let path = normalize(path);
        let result = self.release(&path);
        self.tracker.unregister(&ResourceKey::File(path.clone()));
        match result {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                log::warn!("Error closing handle for {}: {}", path.display(), e);
                true
            }
            None => false,
        }
    }

    /// Closes every handle at or below `path`. Returns how many were closed.
    pub fn close_under(&self, path: &Path) -> usize {
        let path = normalize(path);
        let affected: Vec<PathBuf> = self
            .lock()
            .keys()
            .filter(|open| open.starts_with(&path))
            .cloned()
            .collect();
        affected.iter().filter(|open| self.close(open)).count()
    }

    /// Best-effort close of every open handle; the registry is empty afterwards.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(PathBuf, OpenHandle)> = self.lock().drain().collect();
        let count = drained.len();
        for (path, handle) in drained {
            self.tracker.unregister(&ResourceKey::File(path.clone()));
            if let Err(e) = handle.close(&path) {
                log::error!("Error closing handle for {}: {}", path.display(), e);
            }
        }
        if count > 0 {
            log::info!("Closed {} open file handle(s)", count);
        }
        count
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.lock().contains_key(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<HandleInfo> {
        let mut handles: Vec<HandleInfo> = self
            .lock()
            .iter()
            .map(|(path, handle)| HandleInfo {
                id: handle.id.to_string(),
                path: path.to_string_lossy().into_owned(),
                opened_at: handle.opened_at,
            })
            .collect();
        handles.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        handles
    }
}

/// Scoped access to a tracked handle. The handle is closed when the guard is
/// closed explicitly or dropped, whichever comes first.
pub struct TrackedFile {
    registry: Arc<HandleRegistry>,
    path: PathBuf,
    id: Uuid,
    closed: bool,
}

impl TrackedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the open file. Fails if the handle was closed from
    /// elsewhere (a move, delete or shutdown) in the meantime.
    pub fn with_file<R>(&self, f: impl FnOnce(&mut File) -> io::Result<R>) -> io::Result<R> {
        let mut open = self.registry.lock();
        match open.get_mut(&self.path) {
            Some(handle) if handle.id == self.id => f(&mut handle.file),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("handle for {} was closed", self.path.display()),
            )),
        }
    }

    /// Closes the handle now and reports any failure to release it.
    pub fn close(mut self) -> io::Result<()> {
        self.closed = true;
        self.registry
            .release_matching(&self.path, self.id)
            .unwrap_or(Ok(()))
    }
}

impl Drop for TrackedFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(Err(e)) = self.registry.release_matching(&self.path, self.id) {
            log::warn!("Error closing handle for {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn setup() -> (Arc<ResourceTracker>, Arc<HandleRegistry>) {
        let tracker = Arc::new(ResourceTracker::new());
        let registry = HandleRegistry::new(Arc::clone(&tracker));
        (tracker, registry)
    }

    #[test]
    fn test_open_registers_with_tracker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let (tracker, registry) = setup();

        let handle = registry.open(&path, Access::Overwrite).unwrap();
        assert!(registry.is_open(&path));
        assert!(tracker.contains(&ResourceKey::File(path.clone())));

        handle.close().unwrap();
        assert!(!registry.is_open(&path));
        assert!(!tracker.contains(&ResourceKey::File(path)));
    }

    #[test]
    fn test_drop_closes_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let (tracker, registry) = setup();

        {
            let handle = registry.open(&path, Access::Overwrite).unwrap();
            handle.with_file(|f| f.write_all(b"hello")).unwrap();
        }
        assert!(registry.is_empty());
        assert!(tracker.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_reopen_replaces_existing_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let (tracker, registry) = setup();

        let first = registry.open(&path, Access::Overwrite).unwrap();
        let second = registry.open(&path, Access::Overwrite).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(tracker.len(), 1);

        // The stale guard can no longer reach the file, and dropping it must
        // not close the replacement.
        assert!(first.with_file(|f| f.write_all(b"x")).is_err());
        drop(first);
        assert!(registry.is_open(&path));
        second.with_file(|f| f.write_all(b"y")).unwrap();
    }

    #[test]
    fn test_close_under_directory() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Work");
        std::fs::create_dir(&folder).unwrap();
        let inside = folder.join("todo.txt");
        let outside = dir.path().join("other.txt");
        let (_tracker, registry) = setup();

        let _a = registry.open(&inside, Access::Overwrite).unwrap();
        let _b = registry.open(&outside, Access::Overwrite).unwrap();

        assert_eq!(registry.close_under(&folder), 1);
        assert!(!registry.is_open(&inside));
        assert!(registry.is_open(&outside));
    }

    #[test]
    fn test_close_all_is_idempotent() {
        let dir = tempdir().unwrap();
        let (tracker, registry) = setup();
        let _a = registry.open(&dir.path().join("a.txt"), Access::Overwrite).unwrap();
        let _b = registry.open(&dir.path().join("b.txt"), Access::Overwrite).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(tracker.is_empty());
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_tracker_cleanup_releases_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let (tracker, registry) = setup();

        let handle = registry.open(&path, Access::Overwrite).unwrap();
        assert_eq!(tracker.cleanup_all(), 1);
        assert!(!registry.is_open(&path));
        assert!(handle.with_file(|f| f.write_all(b"late")).is_err());
    }

    #[test]
    fn test_read_handle_is_not_synced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "content").unwrap();
        let (_tracker, registry) = setup();

        let handle = registry.open(&path, Access::Read).unwrap();
        let mut content = String::new();
        handle.with_file(|f| f.read_to_string(&mut content)).unwrap();
        assert_eq!(content, "content");
        handle.close().unwrap();
    }

    #[test]
    fn test_snapshot_lists_open_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let (_tracker, registry) = setup();

        let _handle = registry.open(&path, Access::Overwrite).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].path, path.to_string_lossy());
        assert_eq!(snapshot[0].id.len(), 36);
    }

    #[test]
    fn test_create_new_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "").unwrap();
        let (tracker, registry) = setup();

        let err = registry.open(&path, Access::CreateNew).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(registry.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_paths_are_normalized() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Work");
        std::fs::create_dir(&folder).unwrap();
        let path = dir.path().join("a.txt");
        let (tracker, registry) = setup();

        let handle = registry
            .open(&folder.join("..").join("a.txt"), Access::Overwrite)
            .unwrap();
        assert_eq!(handle.path(), path.as_path());
        assert!(registry.is_open(&path));
        assert!(tracker.contains(&ResourceKey::File(path.clone())));

        assert_eq!(registry.close_under(dir.path()), 1);
        assert!(registry.is_empty());
    }
}

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::error::{EntryKind, FsError, Result};
use crate::handles::{Access, HandleInfo, HandleRegistry};
use crate::models::FileSystemEntry;
use crate::process::{ResourceKey, ResourceTracker};

/// Extension appended to every note created through [`FileStore::create_file`].
pub const NOTE_EXTENSION: &str = "txt";

/// Subsystem name under which the store registers itself with the tracker.
pub const HANDLES_SUBSYSTEM: &str = "file-handles";

/// Checks that `name` is usable as a single new entry inside a directory.
///
/// Rejects empty names, `.` and `..`, and anything containing a path
/// separator, so a create can never land outside the chosen parent.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative path segment")
    } else if name.contains('/') || name.contains('\\') {
        Some("name contains a path separator")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(FsError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Lexically resolves `.` and `..` segments, the way the platform path join
/// does. The filesystem is not consulted, so symlinks are not followed.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                let after_parent =
                    matches!(normalized.components().next_back(), Some(Component::ParentDir));
                if at_root && normalized.has_root() {
                    // `/..` is `/`
                } else if at_root || after_parent {
                    normalized.push("..");
                } else {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Locations derived from the host's user-data directory.
///
/// - `{data_dir}/notes/` - the notes root
/// - `{data_dir}/preferences.json` - persisted preferences
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub notes_dir: PathBuf,
    pub preferences_file: PathBuf,
}

impl AppPaths {
    /// Resolves the platform data directory.
    ///
    /// On Linux: ~/.local/share/neatnote/
    /// On macOS: ~/Library/Application Support/neatnote/
    /// On Windows: C:\Users\{user}\AppData\Roaming\neatnote\
    pub fn new() -> std::result::Result<Self, String> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| "Could not determine data directory".to_string())?
            .join("neatnote");
        Ok(Self::with_base(&data_dir))
    }

    /// Uses `data_dir` as the user-data location. Useful for tests and for
    /// hosts that supply their own location.
    pub fn with_base(data_dir: &Path) -> Self {
        let data_dir = normalize(data_dir);
        Self {
            notes_dir: data_dir.join("notes"),
            preferences_file: data_dir.join("preferences.json"),
            data_dir,
        }
    }
}

/// Performs every durable operation against the notes tree.
///
/// Apart from the open-handle registry the store holds no state: each call is
/// self-contained and either completes or returns an [`FsError`]. Handles
/// for a path are always closed before that path is moved or deleted.
pub struct FileStore {
    paths: AppPaths,
    handles: Arc<HandleRegistry>,
}

impl FileStore {
    /// Creates the store and registers its handle registry with `tracker`, so
    /// a shutdown closes any handle still open.
    ///
    /// # Arguments
    /// * `paths` - Locations of the notes root and preferences file
    /// * `tracker` - The process-wide tracker drained on shutdown
    ///
    /// # Returns
    /// The shared store. Nothing is created on disk until the first operation.
    pub fn new(paths: AppPaths, tracker: Arc<ResourceTracker>) -> Arc<Self> {
        let handles = HandleRegistry::new(Arc::clone(&tracker));
        let registry: Weak<HandleRegistry> = Arc::downgrade(&handles);
        tracker.register(ResourceKey::subsystem(HANDLES_SUBSYSTEM), move || {
            if let Some(registry) = registry.upgrade() {
                registry.close_all();
            }
            Ok(())
        });
        log::info!("File store rooted at {}", paths.notes_dir.display());
        Arc::new(Self { paths, handles })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn notes_dir(&self) -> &Path {
        &self.paths.notes_dir
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    pub fn open_handles(&self) -> Vec<HandleInfo> {
        self.handles.snapshot()
    }

    /// `parent` when given (an empty path counts as absent), otherwise the
    /// notes root.
    fn resolve_parent(&self, parent: Option<&Path>) -> (PathBuf, bool) {
        match parent {
            Some(p) if !p.as_os_str().is_empty() => (normalize(p), false),
            _ => (self.paths.notes_dir.clone(), true),
        }
    }

    fn ensure_notes_dir(&self) -> Result<()> {
        let notes_dir = &self.paths.notes_dir;
        if !notes_dir.exists() {
            fs::create_dir_all(notes_dir)
                .map_err(|e| FsError::at(notes_dir, "create notes directory", e))?;
            log::info!("Created notes directory: {}", notes_dir.display());
        }
        Ok(())
    }

    /// Creates folder `name` under `parent` (or the notes root).
    ///
    /// Missing ancestors are created. Fails with `AlreadyExists` rather than
    /// touching an existing folder. Returns the new folder's path.
    pub fn create_folder(&self, name: &str, parent: Option<&Path>) -> Result<PathBuf> {
        validate_name(name)?;
        let (base, _) = self.resolve_parent(parent);
        let folder_path = base.join(name);
        log::debug!("Creating folder at: {}", folder_path.display());

        fs::create_dir_all(&base).map_err(|e| FsError::at(&base, "create directory", e))?;

        match fs::create_dir(&folder_path) {
            Ok(()) => {
                log::info!("Folder created: {}", folder_path.display());
                Ok(folder_path)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::info!("Folder already exists: {}", folder_path.display());
                Err(FsError::AlreadyExists {
                    kind: EntryKind::Folder,
                    path: folder_path,
                })
            }
            Err(e) => Err(FsError::at(&folder_path, "create folder", e)),
        }
    }

    /// Creates an empty note `<name>.txt` under `parent` (or the notes root).
    ///
    /// The file is opened through the handle registry and closed explicitly,
    /// so the write has a single, observable close point.
    pub fn create_file(&self, name: &str, parent: Option<&Path>) -> Result<PathBuf> {
        validate_name(name)?;
        let (base, is_default) = self.resolve_parent(parent);
        if is_default {
            self.ensure_notes_dir()?;
        }
        let file_path = base.join(format!("{}.{}", name, NOTE_EXTENSION));
        log::debug!("Creating file at: {}", file_path.display());

        let handle = match self.handles.open(&file_path, Access::CreateNew) {
            Ok(handle) => handle,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::info!("File already exists: {}", file_path.display());
                return Err(FsError::AlreadyExists {
                    kind: EntryKind::File,
                    path: file_path,
                });
            }
            Err(e) => return Err(FsError::at(&file_path, "create file", e)),
        };

        handle
            .with_file(|f| f.write_all(b""))
            .map_err(|e| FsError::at(&file_path, "write file", e))?;
        handle
            .close()
            .map_err(|e| FsError::at(&file_path, "close file", e))?;

        log::info!("File created: {}", file_path.display());
        Ok(file_path)
    }

    /// Reads the whole note at `path` as UTF-8 text.
    ///
    /// The handle is released when this returns, on success and failure alike.
    pub fn read_file(&self, path: &Path) -> Result<String> {
        let handle = self
            .handles
            .open(path, Access::Read)
            .map_err(|e| FsError::at(path, "open file", e))?;

        let content = handle
            .with_file(|f| {
                let size = f.metadata()?.len();
                let mut content = String::with_capacity(size as usize);
                f.read_to_string(&mut content)?;
                Ok(content)
            })
            .map_err(|e| FsError::at(path, "read file", e))?;

        log::debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(content)
    }

    /// Replaces the content of `path` with `content`. There is no append mode.
    pub fn save_file(&self, path: &Path, content: &str) -> Result<()> {
        let handle = self
            .handles
            .open(path, Access::Overwrite)
            .map_err(|e| FsError::at(path, "open file", e))?;

        handle
            .with_file(|f| f.write_all(content.as_bytes()))
            .map_err(|e| FsError::at(path, "write file", e))?;
        handle
            .close()
            .map_err(|e| FsError::at(path, "close file", e))?;

        log::info!("File saved: {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    /// Lists the direct children of `dir` (or the notes root, created on
    /// demand). Folders come first, then names in case-insensitive order.
    pub fn list_files(&self, dir: Option<&Path>) -> Result<Vec<FileSystemEntry>> {
        let (target, is_default) = self.resolve_parent(dir);
        if is_default {
            self.ensure_notes_dir()?;
        }
        log::debug!("Listing files in directory: {}", target.display());

        let mut files = Vec::new();
        for entry in fs::read_dir(&target).map_err(|e| FsError::at(&target, "list directory", e))? {
            let entry = entry.map_err(|e| FsError::at(&target, "list directory", e))?;
            let is_directory = entry
                .file_type()
                .map_err(|e| FsError::at(&entry.path(), "inspect", e))?
                .is_dir();
            files.push(FileSystemEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: target.join(entry.file_name()).to_string_lossy().into_owned(),
                is_directory,
            });
        }

        files.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });
        log::debug!("Found {} items in {}", files.len(), target.display());
        Ok(files)
    }

    /// Moves `source` (file or folder) into `target_dir` (or the notes root),
    /// keeping its name. Returns the new path.
    ///
    /// Moving onto itself succeeds without touching the disk. Moving a folder
    /// into its own subtree, or onto an existing entry, is refused before
    /// anything changes. Open handles at or below `source` are closed first.
    pub fn move_file(&self, source: &Path, target_dir: Option<&Path>) -> Result<PathBuf> {
        let source = normalize(source);
        if fs::symlink_metadata(&source).is_err() {
            log::error!("Source does not exist: {}", source.display());
            return Err(FsError::NotFound(source));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| FsError::InvalidMove(source.clone()))?
            .to_owned();

        let (target_base, is_default) = self.resolve_parent(target_dir);
        if is_default {
            self.ensure_notes_dir()?;
        } else if !target_base.is_dir() {
            log::error!("Target folder does not exist: {}", target_base.display());
            return Err(FsError::NotFound(target_base));
        }
        let target = target_base.join(&file_name);
        log::debug!("Moving {} to {}", source.display(), target.display());

        if target == source {
            log::debug!("Source and target paths are identical, nothing to move");
            return Ok(target);
        }
        if target.starts_with(&source) {
            log::warn!("Refusing to move {} into its own subfolder", source.display());
            return Err(FsError::InvalidMove(source));
        }
        if fs::symlink_metadata(&target).is_ok() {
            return Err(FsError::AlreadyExists {
                kind: EntryKind::of(&target),
                path: target,
            });
        }

        let closed = self.handles.close_under(&source);
        if closed > 0 {
            log::info!("Closed {} open handle(s) before moving {}", closed, source.display());
        }

        relocate(&source, &target)?;
        log::info!("Moved {} to {}", source.display(), target.display());
        Ok(target)
    }

    /// Deletes a file, or a folder with everything below it.
    ///
    /// Open handles at or below `path` are closed first. Confirmation is the
    /// caller's business.
    pub fn delete_item(&self, path: &Path) -> Result<()> {
        let path = normalize(path);
        let closed = self.handles.close_under(&path);
        if closed > 0 {
            log::info!("Closed {} open handle(s) before deleting {}", closed, path.display());
        }

        let metadata = fs::symlink_metadata(&path).map_err(|e| FsError::at(&path, "inspect", e))?;
        if metadata.is_dir() {
            log::debug!("Deleting directory: {}", path.display());
            fs::remove_dir_all(&path).map_err(|e| FsError::at(&path, "delete folder", e))?;
        } else {
            log::debug!("Deleting file: {}", path.display());
            fs::remove_file(&path).map_err(|e| FsError::at(&path, "delete file", e))?;
        }

        log::info!("Deleted {}", path.display());
        Ok(())
    }

    /// Best-effort close of every tracked handle. Returns how many were open.
    pub fn close_all_handles(&self) -> usize {
        self.handles.close_all()
    }
}

/// Renames `source` to `target`, falling back to copy-then-delete when the
/// two live on different volumes.
fn relocate(source: &Path, target: &Path) -> Result<()> {
    relocate_with(source, target, |from, to| fs::rename(from, to), remove_entry)
}

fn relocate_with(
    source: &Path,
    target: &Path,
    rename: impl FnOnce(&Path, &Path) -> io::Result<()>,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<()> {
    match rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            log::info!("Cross-device move, copying {}", source.display());
            copy_then_remove_with(source, target, remove)
        }
        Err(e) => Err(FsError::at(source, "move", e)),
    }
}

/// Copies `source` to `target` and then removes `source`.
///
/// A failed copy is rolled back. If only the removal fails both copies are
/// left in place and a [`FsError::PartialMove`] is returned.
pub(crate) fn copy_then_remove(source: &Path, target: &Path) -> Result<()> {
    copy_then_remove_with(source, target, remove_entry)
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn copy_then_remove_with(
    source: &Path,
    target: &Path,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<()> {
    let is_dir = fs::symlink_metadata(source)
        .map_err(|e| FsError::at(source, "inspect", e))?
        .is_dir();

    if let Err(e) = copy_recursively(source, target) {
        let rollback = if is_dir {
            fs::remove_dir_all(target)
        } else {
            fs::remove_file(target)
        };
        if let Err(rollback_err) = rollback {
            if rollback_err.kind() != io::ErrorKind::NotFound {
                log::error!(
                    "Could not remove partial copy at {}: {}",
                    target.display(),
                    rollback_err
                );
            }
        }
        return Err(FsError::at(source, "copy", e));
    }

    remove(source).map_err(|e| {
        log::error!(
            "Moved {} to {} but the original could not be removed: {}",
            source.display(),
            target.display(),
            e
        );
        FsError::PartialMove {
            from: source.to_path_buf(),
            to: target.to_path_buf(),
            source: e,
        }
    })
}

fn copy_recursively(source: &Path, target: &Path) -> io::Result<()> {
    if fs::symlink_metadata(source)?.is_dir() {
        fs::create_dir(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, target).map(|_| ())
    }
}

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which kind of tree entry an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
}

impl EntryKind {
    pub fn of(path: &Path) -> Self {
        if path.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Folder => f.write_str("Folder"),
            EntryKind::File => f.write_str("File"),
        }
    }
}

/// Failure category carried on the wire next to the human-readable message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidName,
    InvalidMove,
    PartialMove,
    Io,
    Transport,
}

/// Errors produced by [`crate::filesystem::FileStore`].
#[derive(Error, Debug)]
pub enum FsError {
    #[error("{kind} already exists")]
    AlreadyExists { kind: EntryKind, path: PathBuf },

    #[error("File does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Cannot move '{}' into its own subfolder", .0.display())]
    InvalidMove(PathBuf),

    #[error(
        "Copied '{}' to '{}' but could not remove the original: {source}",
        .from.display(),
        .to.display()
    )]
    PartialMove {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },
}

impl FsError {
    /// Classifies an I/O failure on `path`; a missing path becomes [`FsError::NotFound`].
    pub fn at(path: &Path, action: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            _ => FsError::Io {
                context: format!("Failed to {} '{}'", action, path.display()),
                source,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::InvalidName { .. } => ErrorKind::InvalidName,
            FsError::InvalidMove(_) => ErrorKind::InvalidMove,
            FsError::PartialMove { .. } => ErrorKind::PartialMove,
            FsError::Io { .. } => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Failure reaching the file service at all, as opposed to the service reporting an error.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("File service is unavailable: {0}")]
    Unavailable(String),

    #[error("File service request failed: {0}")]
    Failed(String),
}

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorKind, Result, TransportError};
use crate::filesystem::FileStore;
use crate::models::{CreatedPath, Done, FileContent, Listing, Moved, Outcome, Payload};

/// A request to the file service, as sent over the IPC boundary.
///
/// The `command` tag carries the channel name, e.g.
/// `{"command": "move-file", "sourcePath": "...", "targetDir": null}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FileRequest {
    CreateFolder {
        name: String,
        #[serde(default)]
        parent_path: Option<String>,
    },
    CreateFile {
        name: String,
        #[serde(default)]
        parent_path: Option<String>,
    },
    ReadFile {
        path: String,
    },
    SaveFile {
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    ListFiles {
        #[serde(default)]
        dir_path: Option<String>,
    },
    MoveFile {
        source_path: String,
        #[serde(default)]
        target_dir: Option<String>,
    },
    DeleteItem {
        path: String,
    },
}

impl FileRequest {
    pub fn command(&self) -> &'static str {
        match self {
            FileRequest::CreateFolder { .. } => "create-folder",
            FileRequest::CreateFile { .. } => "create-file",
            FileRequest::ReadFile { .. } => "read-file",
            FileRequest::SaveFile { .. } => "save-file",
            FileRequest::ListFiles { .. } => "list-files",
            FileRequest::MoveFile { .. } => "move-file",
            FileRequest::DeleteItem { .. } => "delete-item",
        }
    }
}

/// Carries a [`FileRequest`] to whatever executes it and returns the raw
/// JSON response.
pub trait Transport: Send + Sync {
    fn invoke(
        &self,
        request: FileRequest,
    ) -> impl Future<Output = std::result::Result<Value, TransportError>> + Send;
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn respond<P: Payload>(command: &str, result: Result<P>) -> Value {
    if let Err(e) = &result {
        log::warn!("{} failed: {}", command, e);
    }
    let outcome = Outcome::from(result);
    serde_json::to_value(&outcome).unwrap_or_else(|e| {
        json!({ "success": false, "error": e.to_string(), "kind": ErrorKind::Io })
    })
}

/// Executes `request` against `store` and encodes the uniform response.
///
/// Never fails: every error is folded into a `success: false` value.
pub fn dispatch(store: &FileStore, request: FileRequest) -> Value {
    let command = request.command();
    log::debug!("Handling {}", command);
    match request {
        FileRequest::CreateFolder { name, parent_path } => respond(
            command,
            store
                .create_folder(&name, parent_path.as_deref().map(Path::new))
                .map(|p| CreatedPath { path: path_string(&p) }),
        ),
        FileRequest::CreateFile { name, parent_path } => respond(
            command,
            store
                .create_file(&name, parent_path.as_deref().map(Path::new))
                .map(|p| CreatedPath { path: path_string(&p) }),
        ),
        FileRequest::ReadFile { path } => respond(
            command,
            store
                .read_file(Path::new(&path))
                .map(|content| FileContent { content }),
        ),
        FileRequest::SaveFile { path, content } => respond(
            command,
            store
                .save_file(Path::new(&path), content.as_deref().unwrap_or_default())
                .map(|()| Done {}),
        ),
        FileRequest::ListFiles { dir_path } => respond(
            command,
            store
                .list_files(dir_path.as_deref().map(Path::new))
                .map(|files| Listing { files }),
        ),
        FileRequest::MoveFile {
            source_path,
            target_dir,
        } => respond(
            command,
            store
                .move_file(Path::new(&source_path), target_dir.as_deref().map(Path::new))
                .map(|p| Moved {
                    new_path: path_string(&p),
                }),
        ),
        FileRequest::DeleteItem { path } => respond(
            command,
            store.delete_item(Path::new(&path)).map(|()| Done {}),
        ),
    }
}

/// Runs requests against a [`FileStore`] in the same process, on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct InProcess {
    store: Arc<FileStore>,
}

impl InProcess {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }
}

impl Transport for InProcess {
    async fn invoke(&self, request: FileRequest) -> std::result::Result<Value, TransportError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || dispatch(&store, request))
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }
}

/// Typed client for the file service.
///
/// Every method resolves to an [`Outcome`]; a transport failure or an
/// unreadable response becomes a failure of kind `transport` instead of an
/// error the caller has to handle separately.
pub struct FileService<T> {
    transport: T,
}

impl FileService<InProcess> {
    pub fn in_process(store: Arc<FileStore>) -> Self {
        Self::new(InProcess::new(store))
    }
}

impl<T: Transport> FileService<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn call<P: Payload>(&self, request: FileRequest) -> Outcome<P> {
        let command = request.command();
        let value = match self.transport.invoke(request).await {
            Ok(value) => value,
            Err(e) => {
                log::error!("Error invoking {}: {}", command, e);
                return Outcome::failure(ErrorKind::Transport, e.to_string());
            }
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            log::error!("Unreadable response to {}: {}", command, e);
            Outcome::failure(
                ErrorKind::Transport,
                format!("Unreadable response to {}: {}", command, e),
            )
        })
    }

    pub async fn create_folder(&self, name: &str, parent_path: Option<&str>) -> Outcome<CreatedPath> {
        self.call(FileRequest::CreateFolder {
            name: name.to_string(),
            parent_path: parent_path.map(str::to_string),
        })
        .await
    }

    pub async fn create_file(&self, name: &str, parent_path: Option<&str>) -> Outcome<CreatedPath> {
        self.call(FileRequest::CreateFile {
            name: name.to_string(),
            parent_path: parent_path.map(str::to_string),
        })
        .await
    }

    pub async fn read_file(&self, path: &str) -> Outcome<FileContent> {
        self.call(FileRequest::ReadFile {
            path: path.to_string(),
        })
        .await
    }

    pub async fn save_file(&self, path: &str, content: &str) -> Outcome<Done> {
        self.call(FileRequest::SaveFile {
            path: path.to_string(),
            content: Some(content.to_string()),
        })
        .await
    }

    pub async fn list_files(&self, dir_path: Option<&str>) -> Outcome<Listing> {
        self.call(FileRequest::ListFiles {
            dir_path: dir_path.map(str::to_string),
        })
        .await
    }

    pub async fn move_file(&self, source_path: &str, target_dir: Option<&str>) -> Outcome<Moved> {
        self.call(FileRequest::MoveFile {
            source_path: source_path.to_string(),
            target_dir: target_dir.map(str::to_string),
        })
        .await
    }

    pub async fn delete_item(&self, path: &str) -> Outcome<Done> {
        self.call(FileRequest::DeleteItem {
            path: path.to_string(),
        })
        .await
    }
}

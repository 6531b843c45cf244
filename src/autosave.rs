use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::{FileContent, Outcome};
use crate::service::{FileService, Transport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Failed(String),
}

struct EditorState {
    active: Option<PathBuf>,
    content: String,
    dirty: bool,
    status: SaveStatus,
}

/// Keeps the open note's buffer and saves it after a pause in editing.
///
/// Every edit restarts the delay, so a burst of keystrokes produces a single
/// save of the latest content. Once a save has been handed to the file
/// service it always runs to completion, and saves are issued one at a time:
/// a save waits for the one in flight before it takes its snapshot.
pub struct AutoSaver<T> {
    service: Arc<FileService<T>>,
    state: Arc<Mutex<EditorState>>,
    in_flight: Arc<AsyncMutex<()>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    delay: Duration,
}

impl<T: Transport + 'static> AutoSaver<T> {
    pub fn new(service: Arc<FileService<T>>, delay: Duration) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(EditorState {
                active: None,
                content: String::new(),
                dirty: false,
                status: SaveStatus::Idle,
            })),
            in_flight: Arc::new(AsyncMutex::new(())),
            timer: Mutex::new(None),
            delay,
        }
    }

    fn state(&self) -> MutexGuard<'_, EditorState> {
        lock(&self.state)
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.abort();
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.state().status.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn active_file(&self) -> Option<PathBuf> {
        self.state().active.clone()
    }

    pub fn content(&self) -> String {
        self.state().content.clone()
    }

    /// Records new buffer content and restarts the save delay.
    ///
    /// Returns `false` (and does nothing) when no file is open.
    /// Must be called from within a tokio runtime.
    pub fn edit(&self, content: impl Into<String>) -> bool {
        {
            let mut state = self.state();
            if state.active.is_none() {
                return false;
            }
            state.content = content.into();
            state.dirty = true;
        }

        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        let in_flight = Arc::clone(&self.in_flight);
        let delay = self.delay;
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            // Detached so a later edit aborting this timer cannot cut the save short.
            tokio::spawn(persist(service, state, in_flight));
        }));
        true
    }

    /// Saves pending changes immediately, skipping the delay.
    pub async fn save_now(&self) -> SaveStatus {
        self.cancel_timer();
        persist(
            Arc::clone(&self.service),
            Arc::clone(&self.state),
            Arc::clone(&self.in_flight),
        )
        .await
    }

    /// Makes `path` the active file, saving the previous one first if it has
    /// unsaved changes.
    pub async fn open(&self, path: &str) -> Outcome<FileContent> {
        if self.is_dirty() {
            if let SaveStatus::Failed(e) = self.save_now().await {
                log::warn!("Switching files with unsaved changes: {}", e);
            }
        }
        self.cancel_timer();

        let outcome = self.service.read_file(path).await;
        if let Outcome::Success(file) = &outcome {
            let mut state = self.state();
            state.active = Some(PathBuf::from(path));
            state.content = file.content.clone();
            state.dirty = false;
            state.status = SaveStatus::Idle;
        }
        outcome
    }

    /// Forgets the active file if `path` is it or one of its ancestors.
    pub fn file_deleted(&self, path: &Path) {
        let mut state = self.state();
        let affected = state
            .active
            .as_deref()
            .is_some_and(|active| active.starts_with(path));
        if affected {
            drop(state);
            self.cancel_timer();
            state = self.state();
            log::debug!("Active file deleted, clearing editor");
            state.active = None;
            state.content.clear();
            state.dirty = false;
            state.status = SaveStatus::Idle;
        }
    }

    /// Follows the active file when it, or a folder containing it, is moved.
    pub fn file_moved(&self, from: &Path, to: &Path) {
        let mut state = self.state();
        let relocated = state
            .active
            .as_deref()
            .and_then(|active| active.strip_prefix(from).ok())
            .map(|rest| {
                if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                }
            });
        if let Some(new_path) = relocated {
            log::debug!("Active file moved to {}", new_path.display());
            state.active = Some(new_path);
        }
    }
}

fn lock(state: &Mutex<EditorState>) -> MutexGuard<'_, EditorState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn persist<T: Transport>(
    service: Arc<FileService<T>>,
    state: Arc<Mutex<EditorState>>,
    in_flight: Arc<AsyncMutex<()>>,
) -> SaveStatus {
    // Held until the write lands, so an older snapshot never overwrites a newer one.
    let _slot = in_flight.lock().await;
    let (path, content) = {
        let mut editor = lock(&state);
        let path = match &editor.active {
            Some(path) if editor.dirty => path.clone(),
            _ => return editor.status.clone(),
        };
        editor.dirty = false;
        editor.status = SaveStatus::Saving;
        (path, editor.content.clone())
    };

    let path_str = path.to_string_lossy();
    let outcome = service.save_file(&path_str, &content).await;

    let mut editor = lock(&state);
    let status = match outcome {
        Outcome::Success(_) => {
            log::debug!("Auto-saved {}", path.display());
            SaveStatus::Saved
        }
        Outcome::Failure { error, .. } => {
            log::error!("Auto-save of {} failed: {}", path.display(), error);
            if editor.active.as_deref() == Some(path.as_path()) {
                editor.dirty = true;
            }
            SaveStatus::Failed(error)
        }
    };
    if editor.active.as_deref() == Some(path.as_path()) {
        editor.status = status.clone();
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{AppPaths, FileStore};
    use crate::process::ResourceTracker;
    use crate::error::TransportError;
    use crate::service::{FileRequest, InProcess};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const DELAY: Duration = Duration::from_millis(40);

    fn setup() -> (TempDir, Arc<FileStore>, AutoSaver<InProcess>) {
        let temp_dir = tempdir().unwrap();
        let tracker = Arc::new(ResourceTracker::new());
        let store = FileStore::new(AppPaths::with_base(temp_dir.path()), tracker);
        let service = Arc::new(FileService::in_process(Arc::clone(&store)));
        (temp_dir, store, AutoSaver::new(service, DELAY))
    }

    async fn settle() {
        sleep(DELAY * 8).await;
    }

    /// Holds back the save of one particular content so a later save can
    /// overtake it.
    struct SlowSave {
        inner: InProcess,
        slow_content: &'static str,
    }

    impl Transport for SlowSave {
        async fn invoke(
            &self,
            request: FileRequest,
        ) -> std::result::Result<serde_json::Value, TransportError> {
            let slow = matches!(
                &request,
                FileRequest::SaveFile { content: Some(c), .. } if c == self.slow_content
            );
            if slow {
                sleep(Duration::from_millis(300)).await;
            }
            self.inner.invoke(request).await
        }
    }

    #[test]
    #[should_panic]
    fn test_edit_outside_runtime_panics() {
        let (_dir, store, saver) = setup();
        let path = store.create_file("note", None).unwrap();
        lock(&saver.state).active = Some(path);
        saver.edit("no runtime to save with");
    }

    #[tokio::test]
    async fn test_edit_without_open_file_is_ignored() {
        let (_dir, _store, saver) = setup();
        assert!(!saver.edit("lost"));
        assert!(!saver.is_dirty());
    }

    #[tokio::test]
    async fn test_burst_of_edits_saves_latest() {
        let (_dir, store, saver) = setup();
        let path = store.create_file("note", None).unwrap();
        saver.open(&path.to_string_lossy()).await.into_result().unwrap();

        assert!(saver.edit("h"));
        assert!(saver.edit("he"));
        assert!(saver.edit("hello"));
        assert!(saver.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        settle().await;
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert_eq!(saver.status(), SaveStatus::Saved);
        assert!(!saver.is_dirty());
    }

    #[tokio::test]
    async fn test_save_now_skips_delay() {
        let (_dir, store, saver) = setup();
        let path = store.create_file("note", None).unwrap();
        saver.open(&path.to_string_lossy()).await.into_result().unwrap();

        saver.edit("urgent");
        assert_eq!(saver.save_now().await, SaveStatus::Saved);
        assert_eq!(fs::read_to_string(&path).unwrap(), "urgent");
    }

    #[tokio::test]
    async fn test_open_saves_previous_file() {
        let (_dir, store, saver) = setup();
        let first = store.create_file("first", None).unwrap();
        let second = store.create_file("second", None).unwrap();
        store.save_file(&second, "second body").unwrap();

        saver.open(&first.to_string_lossy()).await.into_result().unwrap();
        saver.edit("first body");

        let opened = saver.open(&second.to_string_lossy()).await.into_result().unwrap();
        assert_eq!(opened.content, "second body");
        assert_eq!(fs::read_to_string(&first).unwrap(), "first body");
        assert_eq!(saver.active_file(), Some(second));
        assert_eq!(saver.status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_resaved() {
        let (_dir, store, saver) = setup();
        let path = store.create_file("doomed", None).unwrap();
        saver.open(&path.to_string_lossy()).await.into_result().unwrap();

        saver.edit("never written");
        store.delete_item(&path).unwrap();
        saver.file_deleted(&path);

        settle().await;
        assert!(!path.exists());
        assert_eq!(saver.active_file(), None);
        assert!(!saver.edit("still nothing"));
    }

    #[tokio::test]
    async fn test_move_of_parent_follows_active_file() {
        let (_dir, store, saver) = setup();
        let work = store.create_folder("Work", None).unwrap();
        let note = store.create_file("todo", Some(&work)).unwrap();
        let archive = store.create_folder("Archive", None).unwrap();
        saver.open(&note.to_string_lossy()).await.into_result().unwrap();

        let moved = store.move_file(&work, Some(&archive)).unwrap();
        saver.file_moved(&work, &moved);
        assert_eq!(saver.active_file(), Some(moved.join("todo.txt")));

        saver.edit("after move");
        assert_eq!(saver.save_now().await, SaveStatus::Saved);
        assert_eq!(fs::read_to_string(moved.join("todo.txt")).unwrap(), "after move");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_changes_dirty() {
        let (_dir, store, saver) = setup();
        let work = store.create_folder("Work", None).unwrap();
        let note = store.create_file("todo", Some(&work)).unwrap();
        saver.open(&note.to_string_lossy()).await.into_result().unwrap();

        // The folder disappears behind the editor's back.
        fs::remove_dir_all(&work).unwrap();
        saver.edit("orphan");

        assert!(matches!(saver.save_now().await, SaveStatus::Failed(_)));
        assert!(saver.is_dirty());
    }

    #[tokio::test]
    async fn test_save_now_waits_for_slower_debounced_save() {
        let temp_dir = tempdir().unwrap();
        let tracker = Arc::new(ResourceTracker::new());
        let store = FileStore::new(AppPaths::with_base(temp_dir.path()), tracker);
        let service = Arc::new(FileService::new(SlowSave {
            inner: InProcess::new(Arc::clone(&store)),
            slow_content: "v1",
        }));
        let saver = AutoSaver::new(service, DELAY);

        let path = store.create_file("note", None).unwrap();
        saver.open(&path.to_string_lossy()).await.into_result().unwrap();

        saver.edit("v1");
        // Let the debounce fire; the "v1" save is now stuck in the transport.
        sleep(DELAY * 3).await;
        assert_eq!(saver.status(), SaveStatus::Saving);

        saver.edit("v2");
        assert_eq!(saver.save_now().await, SaveStatus::Saved);
        assert!(!saver.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "v2");

        settle().await;
        assert_eq!(fs::read_to_string(&path).unwrap(), "v2");
    }
}

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Something that must be released before the process exits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// An open file handle, keyed by its path.
    File(PathBuf),
    /// A named subsystem such as the IPC handler set.
    Subsystem(String),
    /// A top-level window, keyed by its label.
    Window(String),
}

impl ResourceKey {
    pub fn subsystem(name: impl Into<String>) -> Self {
        ResourceKey::Subsystem(name.into())
    }

    fn is_empty(&self) -> bool {
        match self {
            ResourceKey::File(path) => path.as_os_str().is_empty(),
            ResourceKey::Subsystem(name) | ResourceKey::Window(name) => name.is_empty(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::File(path) => write!(f, "file {}", path.display()),
            ResourceKey::Subsystem(name) => write!(f, "subsystem {}", name),
            ResourceKey::Window(label) => write!(f, "window {}", label),
        }
    }
}

type Cleanup = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct Tracked {
    key: ResourceKey,
    cleanup: Cleanup,
}

/// Process-wide registry of cleanup actions, drained once on shutdown.
///
/// Registrations are independent: registering the same key twice keeps both
/// actions until [`ResourceTracker::unregister`] removes them. Callers that
/// want replace semantics unregister first.
///
/// The shutting-down flag, not registry emptiness, is what tells the exit
/// sequence that cleanup already happened.
pub struct ResourceTracker {
    resources: Mutex<Vec<Tracked>>,
    shutting_down: AtomicBool,
}

impl ResourceTracker {
    pub fn new() -> Self {
        log::debug!("Resource tracker initialized");
        Self {
            resources: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Tracked>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tracks `cleanup` as the release action for `key`.
    ///
    /// An empty key (empty path or name) is ignored.
    pub fn register<F>(&self, key: ResourceKey, cleanup: F)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        if key.is_empty() {
            return;
        }
        let mut resources = self.lock();
        resources.push(Tracked {
            key,
            cleanup: Box::new(cleanup),
        });
        log::debug!("Resource registered, total: {}", resources.len());
    }

    /// Drops every registration for `key` without running it.
    ///
    /// Returns whether anything was removed.
    pub fn unregister(&self, key: &ResourceKey) -> bool {
        let mut resources = self.lock();
        let before = resources.len();
        resources.retain(|tracked| &tracked.key != key);
        let removed = resources.len() != before;
        if removed {
            log::debug!("Resource unregistered, remaining: {}", resources.len());
        }
        removed
    }

    /// Marks the process as shutting down and runs every registered cleanup in
    /// registration order.
    ///
    /// A failing or panicking cleanup is logged and skipped. The registry is
    /// empty afterwards; calling this again only re-runs an empty loop.
    /// Returns how many cleanups ran.
    pub fn cleanup_all(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        // Cleanups may call back into the tracker, so run them outside the lock.
        let drained = std::mem::take(&mut *self.lock());
        log::info!("Cleaning up all resources ({})", drained.len());

        let count = drained.len();
        for Tracked { key, cleanup } in drained {
            match panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Error cleaning up {}: {}", key, e),
                Err(_) => log::error!("Cleanup of {} panicked", key),
            }
        }

        log::info!("All resources cleaned up");
        count
    }

    pub fn is_quitting(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.lock().iter().any(|tracked| &tracked.key == key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

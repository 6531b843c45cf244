use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PreferencesStore;
use crate::process::ResourceTracker;

/// Time between the cleanup pass and the actual termination, so pending
/// cleanup work and log output get a chance to settle.
const SETTLE_DELAY_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Terminated,
}

/// What the caller should do with the default exit it intercepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitDecision {
    /// This request started the shutdown; suppress the default exit and let
    /// the coordinator terminate the process.
    Proceed,
    /// A shutdown is already under way; nothing else to do.
    AlreadyInProgress,
}

/// Drives the one-way `Running -> ShuttingDown -> Terminated` sequence.
pub struct ShutdownCoordinator {
    tracker: Arc<ResourceTracker>,
    preferences: Arc<PreferencesStore>,
    state: Arc<Mutex<ShutdownState>>,
    settle: Duration,
}

impl ShutdownCoordinator {
    pub fn new(tracker: Arc<ResourceTracker>, preferences: Arc<PreferencesStore>) -> Self {
        Self {
            tracker,
            preferences,
            state: Arc::new(Mutex::new(ShutdownState::Running)),
            settle: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handles a request to exit.
    ///
    /// The first request releases every tracked resource, flushes
    /// preferences and schedules `terminate` after the settle delay. Any
    /// later request is a no-op.
    ///
    /// # Arguments
    /// * `terminate` - Ends the process; runs once, after the settle delay
    ///
    /// # Returns
    /// * `ExitDecision::Proceed` - The caller must suppress its default exit
    /// * `ExitDecision::AlreadyInProgress` - Nothing was done
    pub fn request_exit<F>(&self, terminate: F) -> ExitDecision
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ShutdownState::Running || self.tracker.is_quitting() {
                log::debug!("Exit requested while already shutting down");
                return ExitDecision::AlreadyInProgress;
            }
            *state = ShutdownState::ShuttingDown;
        }
        log::info!("Shutting down");

        let released = self.tracker.cleanup_all();
        log::debug!("Released {} tracked resource(s)", released);

        if let Err(e) = self.preferences.flush() {
            log::error!("Failed to flush preferences on exit: {}", e);
        }

        let state = Arc::clone(&self.state);
        let settle = self.settle;
        let finish = move || {
            *state.lock().unwrap_or_else(|e| e.into_inner()) = ShutdownState::Terminated;
            log::info!("Shutdown complete");
            terminate();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(settle).await;
                    finish();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(settle);
                    finish();
                });
            }
        }

        ExitDecision::Proceed
    }
}

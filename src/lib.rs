pub mod autosave;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod logging;
pub mod models;
pub mod process;
pub mod service;
pub mod shutdown;

#[cfg(feature = "desktop")]
pub mod commands;

pub use error::{ErrorKind, FsError};
pub use filesystem::{AppPaths, FileStore};
pub use models::Outcome;
pub use process::{ResourceKey, ResourceTracker};
pub use service::{FileRequest, FileService, InProcess, Transport};

#[cfg(feature = "desktop")]
pub use desktop::run;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use tauri::{Manager, RunEvent};

    use crate::commands;
    use crate::config::PreferencesStore;
    use crate::filesystem::{AppPaths, FileStore};
    use crate::process::{ResourceKey, ResourceTracker};
    use crate::service::FileService;
    use crate::shutdown::{ExitDecision, ShutdownCoordinator};

    const MAIN_WINDOW: &str = "main";

    /// Builds and runs the desktop shell with the given generated context.
    pub fn run(context: tauri::Context<tauri::Wry>) -> Result<(), String> {
        crate::logging::init();

        let paths = AppPaths::new()?;
        let tracker = Arc::new(ResourceTracker::new());
        let store = FileStore::new(paths.clone(), Arc::clone(&tracker));
        let preferences = Arc::new(PreferencesStore::new(paths.preferences_file.clone())?);
        let coordinator = ShutdownCoordinator::new(Arc::clone(&tracker), Arc::clone(&preferences));

        let app = tauri::Builder::default()
            .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
                // Focus the main window when a second instance is launched
                if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
                    let _ = window.unminimize();
                    let _ = window.set_focus();
                }
            }))
            .manage(FileService::in_process(Arc::clone(&store)))
            .manage(Arc::clone(&preferences))
            .setup({
                let tracker = Arc::clone(&tracker);
                move |app| {
                    if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
                        tracker.register(ResourceKey::Window(MAIN_WINDOW.to_string()), move || {
                            window.destroy().map_err(|e| e.to_string())
                        });
                    }
                    tracker.register(ResourceKey::subsystem("ipc-handlers"), || {
                        log::debug!("IPC handlers released");
                        Ok(())
                    });
                    log::info!("Application ready");
                    Ok(())
                }
            })
            .invoke_handler(tauri::generate_handler![
                commands::create_folder,
                commands::create_file,
                commands::read_file,
                commands::save_file,
                commands::list_files,
                commands::move_file,
                commands::delete_item,
                commands::get_preferences,
                commands::get_theme,
                commands::set_theme,
                commands::set_last_opened_file,
            ])
            .build(context)
            .map_err(|e| format!("Failed to build application: {}", e))?;

        app.run(move |handle, event| {
            if let RunEvent::ExitRequested { api, .. } = event {
                let handle = handle.clone();
                match coordinator.request_exit(move || handle.exit(0)) {
                    ExitDecision::Proceed => api.prevent_exit(),
                    ExitDecision::AlreadyInProgress => {}
                }
            }
        });
        Ok(())
    }
}

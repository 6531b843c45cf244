use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::{Preferences, Theme};

/// Debounce delay for preference saves
const SAVE_DEBOUNCE_MS: u64 = 1000;

/// Loads, updates and persists [`Preferences`].
///
/// Writes are debounced: a burst of updates produces one write, one second
/// after the last of them. [`PreferencesStore::flush`] forces the pending
/// write out synchronously and is what shutdown calls.
pub struct PreferencesStore {
    preferences: Arc<RwLock<Preferences>>,
    path: Arc<PathBuf>,
    save_handle: Mutex<Option<JoinHandle<()>>>,
    debounce: Duration,
}

impl PreferencesStore {
    /// Loads preferences from `path`, falling back to defaults for a missing
    /// file and for any field that is absent or unreadable.
    ///
    /// # Arguments
    /// * `path` - Path to the preferences.json file
    ///
    /// # Returns
    /// * `Ok(PreferencesStore)` - A store holding the merged preferences
    /// * `Err(String)` - If the file exists but cannot be read or parsed
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let preferences = Self::load_from_file(&path)?;
        Ok(Self {
            preferences: Arc::new(RwLock::new(preferences)),
            path: Arc::new(path),
            save_handle: Mutex::new(None),
            debounce: Duration::from_millis(SAVE_DEBOUNCE_MS),
        })
    }

    /// Overrides the save debounce. Mostly for tests.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn load_from_file(path: &Path) -> Result<Preferences, String> {
        if !path.exists() {
            log::debug!("No preferences at {}, using defaults", path.display());
            return Ok(Preferences::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read preferences file: {}", e))?;
        merge_preferences_with_defaults(&content)
    }

    pub fn get(&self) -> Preferences {
        self.preferences
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Applies `f` in memory. Nothing is written until a save is scheduled
    /// or forced.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Preferences),
    {
        let mut preferences = self.preferences.write().unwrap_or_else(|e| e.into_inner());
        f(&mut preferences);
    }

    /// Schedules a debounced save, replacing any save still waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_save(&self) {
        let mut handle_guard = self.save_handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handle_guard.take() {
            handle.abort();
        }

        let preferences = Arc::clone(&self.preferences);
        let path = Arc::clone(&self.path);
        let debounce = self.debounce;
        *handle_guard = Some(tokio::spawn(async move {
            sleep(debounce).await;
            let snapshot = preferences.read().unwrap_or_else(|e| e.into_inner()).clone();
            if let Err(e) = write_preferences(&path, &snapshot) {
                log::error!("Failed to save preferences: {}", e);
            }
        }));
    }

    pub fn update_and_save<F>(&self, f: F)
    where
        F: FnOnce(&mut Preferences),
    {
        self.update(f);
        self.schedule_save();
    }

    /// Writes the current preferences to disk immediately.
    pub fn save_sync(&self) -> Result<(), String> {
        write_preferences(&self.path, &self.get())
    }

    /// Cancels any pending debounced save and writes synchronously instead.
    pub fn flush(&self) -> Result<(), String> {
        let pending = self
            .save_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = pending {
            handle.abort();
        }
        self.save_sync()?;
        log::info!("Preferences flushed to {}", self.path.display());
        Ok(())
    }

    pub fn theme(&self) -> Theme {
        self.preferences.read().unwrap_or_else(|e| e.into_inner()).theme
    }

    pub fn set_theme(&self, theme: Theme) {
        self.update(|preferences| preferences.theme = theme);
    }

    pub fn last_opened_file(&self) -> Option<String> {
        self.preferences
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_opened_file
            .clone()
    }

    pub fn set_last_opened_file(&self, path: Option<String>) {
        self.update(|preferences| preferences.last_opened_file = path);
    }

    pub fn autosave_delay(&self) -> Duration {
        let ms = self
            .preferences
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .autosave_delay_ms;
        Duration::from_millis(ms)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_preferences(path: &Path, preferences: &Preferences) -> Result<(), String> {
    let content = serde_json::to_string_pretty(preferences)
        .map_err(|e| format!("Failed to serialize preferences: {}", e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create preferences directory: {}", e))?;
    }
    fs::write(path, content).map_err(|e| format!("Failed to write preferences file: {}", e))
}

/// Merges a possibly partial preferences document over the defaults.
///
/// Fields that are missing or hold a value of the wrong shape keep their
/// default. An empty document yields the defaults.
pub fn merge_preferences_with_defaults(partial_json: &str) -> Result<Preferences, String> {
    if partial_json.trim().is_empty() {
        return Ok(Preferences::default());
    }

    let json_value: serde_json::Value = serde_json::from_str(partial_json)
        .map_err(|e| format!("Failed to parse preferences: {}", e))?;

    let mut preferences = Preferences::default();
    if let Some(obj) = json_value.as_object() {
        if let Some(theme) = obj
            .get("theme")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Theme>().ok())
        {
            preferences.theme = theme;
        }
        if let Some(v) = obj.get("last_opened_file") {
            preferences.last_opened_file = v.as_str().map(|s| s.to_string());
        }
        if let Some(v) = obj.get("autosave_delay_ms").and_then(|v| v.as_u64()) {
            preferences.autosave_delay_ms = v;
        }
    }

    Ok(preferences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_without_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let store = PreferencesStore::new(temp_dir.path().join("preferences.json")).unwrap();
        assert_eq!(store.get(), Preferences::default());
        assert_eq!(store.autosave_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("preferences.json");
        fs::write(&path, r#"{"theme": "sepia"}"#).unwrap();

        let store = PreferencesStore::new(path).unwrap();
        assert_eq!(store.theme(), Theme::Sepia);
        assert_eq!(store.get().autosave_delay_ms, 1000);
        assert!(store.last_opened_file().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();
        assert!(PreferencesStore::new(path).is_err());
    }

    #[test]
    fn test_save_sync_creates_parent_and_reloads() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("preferences.json");

        let store = PreferencesStore::new(path.clone()).unwrap();
        store.set_theme(Theme::Dark);
        store.set_last_opened_file(Some("/notes/todo.txt".to_string()));
        store.save_sync().unwrap();

        let reloaded = PreferencesStore::new(path).unwrap();
        assert_eq!(reloaded.theme(), Theme::Dark);
        assert_eq!(reloaded.last_opened_file().as_deref(), Some("/notes/todo.txt"));
    }

    #[test]
    fn test_merge_ignores_invalid_values() {
        let merged =
            merge_preferences_with_defaults(r#"{"theme": "neon", "autosave_delay_ms": -5}"#)
                .unwrap();
        assert_eq!(merged, Preferences::default());
    }

    #[test]
    fn test_merge_empty() {
        assert_eq!(merge_preferences_with_defaults("  ").unwrap(), Preferences::default());
    }

    #[tokio::test]
    async fn test_schedule_save_is_debounced() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("preferences.json");
        let store = PreferencesStore::new(path.clone())
            .unwrap()
            .with_debounce(Duration::from_millis(50));

        store.update_and_save(|p| p.theme = Theme::Dark);
        store.update_and_save(|p| p.theme = Theme::Blue);
        assert!(!path.exists());

        sleep(Duration::from_millis(300)).await;
        let saved = merge_preferences_with_defaults(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.theme, Theme::Blue);
    }

    #[tokio::test]
    async fn test_flush_writes_pending_changes_now() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("preferences.json");
        let store = PreferencesStore::new(path.clone())
            .unwrap()
            .with_debounce(Duration::from_secs(60));

        store.update_and_save(|p| p.autosave_delay_ms = 250);
        store.flush().unwrap();

        let saved = merge_preferences_with_defaults(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.autosave_delay_ms, 250);
    }

    fn optional_theme() -> impl Strategy<Value = Option<Theme>> {
        prop_oneof![Just(None), proptest::sample::select(Theme::ALL.to_vec()).prop_map(Some)]
    }

    fn optional_path() -> impl Strategy<Value = Option<String>> {
        prop_oneof![Just(None), "/[a-zA-Z0-9_/-]{0,30}\\.txt".prop_map(Some)]
    }

    fn optional_delay() -> impl Strategy<Value = Option<u64>> {
        prop_oneof![Just(None), (0u64..10_000).prop_map(Some)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Fields present in a saved document win; absent ones keep their default.
        #[test]
        fn prop_merge_preserves_defaults(
            theme in optional_theme(),
            last_opened_file in optional_path(),
            delay in optional_delay(),
        ) {
            let mut json_obj = serde_json::Map::new();
            if let Some(theme) = theme {
                json_obj.insert("theme".to_string(), serde_json::json!(theme.as_str()));
            }
            if let Some(path) = &last_opened_file {
                json_obj.insert("last_opened_file".to_string(), serde_json::json!(path));
            }
            if let Some(delay) = delay {
                json_obj.insert("autosave_delay_ms".to_string(), serde_json::json!(delay));
            }

            let merged = merge_preferences_with_defaults(&serde_json::to_string(&json_obj).unwrap()).unwrap();
            let defaults = Preferences::default();

            prop_assert_eq!(merged.theme, theme.unwrap_or(defaults.theme));
            prop_assert_eq!(merged.last_opened_file, last_opened_file);
            prop_assert_eq!(merged.autosave_delay_ms, delay.unwrap_or(defaults.autosave_delay_ms));
        }

        /// A theme set and saved is the theme loaded by the next session.
        #[test]
        fn prop_theme_persists(theme in proptest::sample::select(Theme::ALL.to_vec())) {
            let temp_dir = tempdir().unwrap();
            let path = temp_dir.path().join("preferences.json");

            let store = PreferencesStore::new(path.clone()).unwrap();
            store.set_theme(theme);
            store.save_sync().unwrap();

            let reloaded = PreferencesStore::new(path).unwrap();
            prop_assert_eq!(reloaded.theme(), theme);
        }
    }
}

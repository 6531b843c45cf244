use std::sync::Arc;

use tauri::State;

use crate::config::PreferencesStore;
use crate::models::{Preferences, Theme};

type Prefs<'a> = State<'a, Arc<PreferencesStore>>;

#[tauri::command]
pub async fn get_preferences(preferences: Prefs<'_>) -> Result<Preferences, String> {
    Ok(preferences.get())
}

#[tauri::command]
pub async fn get_theme(preferences: Prefs<'_>) -> Result<Theme, String> {
    Ok(preferences.theme())
}

/// Applies and persists a theme by name (`light`, `dark`, `blue` or `sepia`).
#[tauri::command]
pub async fn set_theme(theme: String, preferences: Prefs<'_>) -> Result<Theme, String> {
    let theme: Theme = theme.parse()?;
    preferences.update_and_save(|p| p.theme = theme);
    Ok(theme)
}

/// Remembers the note to reopen on the next launch. `None` clears it.
#[tauri::command]
pub async fn set_last_opened_file(
    path: Option<String>,
    preferences: Prefs<'_>,
) -> Result<(), String> {
    preferences.update_and_save(|p| p.last_opened_file = path);
    Ok(())
}

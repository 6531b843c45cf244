use tauri::State;

use crate::models::{CreatedPath, Done, FileContent, Listing, Moved, Outcome};
use crate::service::{FileService, InProcess};

type Files<'a> = State<'a, FileService<InProcess>>;

/// Creates a folder under `parent_path`, or under the notes root when absent.
#[tauri::command]
pub async fn create_folder(
    name: String,
    parent_path: Option<String>,
    files: Files<'_>,
) -> Result<Outcome<CreatedPath>, String> {
    Ok(files.create_folder(&name, parent_path.as_deref()).await)
}

/// Creates an empty `<name>.txt` note.
#[tauri::command]
pub async fn create_file(
    name: String,
    parent_path: Option<String>,
    files: Files<'_>,
) -> Result<Outcome<CreatedPath>, String> {
    Ok(files.create_file(&name, parent_path.as_deref()).await)
}

#[tauri::command]
pub async fn read_file(path: String, files: Files<'_>) -> Result<Outcome<FileContent>, String> {
    Ok(files.read_file(&path).await)
}

/// Overwrites the note at `path`. A missing `content` writes an empty note.
#[tauri::command]
pub async fn save_file(
    path: String,
    content: Option<String>,
    files: Files<'_>,
) -> Result<Outcome<Done>, String> {
    Ok(files.save_file(&path, content.as_deref().unwrap_or_default()).await)
}

/// Lists `dir_path`, or the notes root when absent. Folders sort first.
#[tauri::command]
pub async fn list_files(
    dir_path: Option<String>,
    files: Files<'_>,
) -> Result<Outcome<Listing>, String> {
    Ok(files.list_files(dir_path.as_deref()).await)
}

#[tauri::command]
pub async fn move_file(
    source_path: String,
    target_dir: Option<String>,
    files: Files<'_>,
) -> Result<Outcome<Moved>, String> {
    Ok(files.move_file(&source_path, target_dir.as_deref()).await)
}

/// Deletes a note, or a folder with its whole subtree. The frontend is
/// expected to have confirmed this with the user.
#[tauri::command]
pub async fn delete_item(path: String, files: Files<'_>) -> Result<Outcome<Done>, String> {
    Ok(files.delete_item(&path).await)
}

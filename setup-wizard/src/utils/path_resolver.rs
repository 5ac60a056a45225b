use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "school-setup-wizard";

/// Resolve the folder the file store lives under (absolute when the platform reports one).
pub fn resolve_data_folder() -> PathBuf {
    // Prefer the per-user data dir; a kiosk without a home falls back to the exe folder
    if let Some(dir) = dirs::data_local_dir() {
        return dir.join(APP_DIR_NAME);
    }
    resolve_deployment_folder().join(APP_DIR_NAME)
}

/// Resolve log folder, next to the store unless configured otherwise.
pub fn resolve_log_folder(data_root: &Path) -> PathBuf {
    data_root.join("logs")
}

/// Folder the executable runs from, else the working directory.
pub fn resolve_deployment_folder() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return dir.to_path_buf();
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

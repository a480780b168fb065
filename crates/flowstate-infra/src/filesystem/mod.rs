//! Filesystem adapters: the data directory and the directory items source.

pub mod items;

use std::path::PathBuf;

pub use items::DirectoryItemsSource;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `FLOWSTATE_DATA_DIR` environment variable
/// 2. `~/.flowstate`
/// 3. `.flowstate` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWSTATE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".flowstate");
    }

    PathBuf::from(".flowstate")
}

//! Global data directory for logs, the default signaling store and downloads.
//!
//! Defaults to `~/.peerdrop/` but can be overridden via `--data-dir`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join(".peerdrop")
}

/// Initialize the global data directory and return it.
///
/// If `custom` is `Some`, uses that path. Later calls keep the first value.
pub fn init(custom: Option<&Path>) -> &'static Path {
    DATA_DIR.get_or_init(|| custom.map(Path::to_path_buf).unwrap_or_else(default_dir))
}

/// Returns the global data directory, falling back to the default location.
pub fn get() -> &'static Path {
    DATA_DIR.get_or_init(default_dir)
}

pub fn signaling_dir() -> PathBuf {
    get().join("signaling")
}

pub fn downloads_dir() -> PathBuf {
    get().join("downloads")
}

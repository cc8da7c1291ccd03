//! Atomic file write utility.
//!
//! Write-to-temp-then-rename, used for signaling documents (so a polling
//! peer never reads half a JSON file) and for saving received files.
//!
//! Invariants:
//! - Write goes to a sibling `.tmp` file first, then a rename replaces the target.
//! - On rename failure the temp file is removed.
//! - Parent directories are created if absent.

use std::io;
use std::path::{Path, PathBuf};
use tracing::error;

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `content` to `path`.
pub async fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);

    tokio::fs::write(&tmp_path, content).await.map_err(|e| {
        error!(
            event = "atomic_write_failure",
            path = %tmp_path.display(),
            error = %e,
            "Failed to write temp file"
        );
        e
    })?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        error!(
            event = "atomic_rename_failure",
            from = %tmp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp file"
        );
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    Ok(())
}

//! Ensures only one `locsync serve` runs against a database.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

/// A lock guard that releases the lock when dropped
pub struct LockGuard {
    _file: File,
}

/// `locsync.db` is guarded by `locsync.db.lock`
fn lock_path(database_path: &Path) -> PathBuf {
    let mut name = database_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "locsync".into());
    name.push(".lock");
    database_path.with_file_name(name)
}

/// Acquire an exclusive lock, failing if another instance is running
pub fn acquire_lock(database_path: &Path) -> Result<LockGuard> {
    let path = lock_path(database_path);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
    }
    let file = File::create(&path).context("Failed to create lock file")?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "Another locsync instance is already serving {}.\n\
            If you believe this is an error, remove: {}",
            database_path.display(),
            path.display()
        )
    })?;

    Ok(LockGuard { _file: file })
}

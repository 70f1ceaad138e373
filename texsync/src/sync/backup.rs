//! Handling of a pre-existing target folder before the first installation.
//! The caller must pick [`backup`] or [`delete`]; installation never
//! overwrites an existing folder.

use std::io;
use std::path::Path;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

use super::error::SyncError;

pub fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Renames `path` to a timestamped sibling and returns the new folder name.
pub async fn backup(path: &Path) -> Result<String, SyncError> {
    backup_at(path, OffsetDateTime::now_utc()).await
}

async fn backup_at(path: &Path, now: OffsetDateTime) -> Result<String, SyncError> {
    ensure_exists(path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::fs(path, io::Error::other("path has no folder name")))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let base = backup_name(&name, now)?;
    let mut candidate = base.clone();
    let mut suffix = 1u32;
    while exists(&parent.join(&candidate)) {
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }

    let target = parent.join(&candidate);
    tokio::fs::rename(path, &target)
        .await
        .map_err(|err| SyncError::fs(path, err))?;
    info!(from = %path.display(), to = %target.display(), "backed up existing folder");
    Ok(candidate)
}

/// Removes the folder tree at `path`.
pub async fn delete(path: &Path) -> Result<(), SyncError> {
    ensure_exists(path)?;
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|err| SyncError::fs(path, err))?;
    info!(path = %path.display(), "deleted existing folder");
    Ok(())
}

fn ensure_exists(path: &Path) -> Result<(), SyncError> {
    if exists(path) {
        Ok(())
    } else {
        Err(SyncError::fs(
            path,
            io::Error::new(io::ErrorKind::NotFound, "folder does not exist"),
        ))
    }
}

fn backup_name(name: &str, now: OffsetDateTime) -> Result<String, SyncError> {
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .map_err(|err| SyncError::fs(name, io::Error::other(err)))?;
    Ok(format!("{name}_backup_{stamp}"))
}

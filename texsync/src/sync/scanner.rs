use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use texsync_core::blob_sha1;
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::paths::{Layout, is_hidden_name, relative_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Managed,
    UserReserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    /// On-disk relative path with the disabled marker stripped.
    pub logical_path: String,
    /// On-disk relative path, `/`-separated.
    pub disk_path: String,
    /// Git blob id. Not computed for the user-reserved zone.
    pub content_hash: Option<String>,
    pub enabled: bool,
    pub zone: Zone,
}

/// Enabled and disabled variants found for one logical path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSlot {
    pub enabled: Option<LocalFileEntry>,
    pub disabled: Option<LocalFileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    managed: BTreeMap<String, LocalSlot>,
    reserved: Vec<LocalFileEntry>,
    warnings: Vec<ScanWarning>,
    /// On-disk relative paths (files or whole directories) that could not be read.
    unreadable: Vec<String>,
}

impl LocalIndex {
    pub fn slot(&self, logical_path: &str) -> Option<&LocalSlot> {
        self.managed.get(logical_path)
    }

    pub fn managed(&self) -> impl Iterator<Item = (&str, &LocalSlot)> {
        self.managed.iter().map(|(path, slot)| (path.as_str(), slot))
    }

    pub fn managed_files(&self) -> usize {
        self.managed
            .values()
            .map(|slot| usize::from(slot.enabled.is_some()) + usize::from(slot.disabled.is_some()))
            .sum()
    }

    pub fn reserved(&self) -> &[LocalFileEntry] {
        &self.reserved
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    pub fn unreadable(&self) -> &[String] {
        &self.unreadable
    }

    /// True if the on-disk `disk_path` is, or lies under, a path that could
    /// not be read.
    pub fn is_unreadable(&self, disk_path: &str) -> bool {
        self.unreadable.iter().any(|blocked| {
            disk_path == blocked
                || disk_path
                    .strip_prefix(blocked.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn insert(&mut self, entry: LocalFileEntry) {
        match entry.zone {
            Zone::UserReserved => self.reserved.push(entry),
            Zone::Managed => {
                let slot = self.managed.entry(entry.logical_path.clone()).or_default();
                if entry.enabled {
                    slot.enabled = Some(entry);
                } else {
                    slot.disabled = Some(entry);
                }
            }
        }
    }

    /// Excludes the on-disk `disk_path` (and anything below it) from planning.
    pub fn mark_unreadable(&mut self, disk_path: impl Into<String>) {
        self.unreadable.push(disk_path.into());
    }

    fn warn(&mut self, path: String, err: &io::Error) {
        warn!(path = %path, error = %err, "skipping unreadable local entry");
        self.warnings.push(ScanWarning {
            path: path.clone(),
            message: err.to_string(),
        });
        self.mark_unreadable(path);
    }
}

pub struct LocalScanner {
    layout: Layout,
}

impl LocalScanner {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Walks `root`. Only an unreadable root is fatal; any other read failure
    /// becomes a warning and the affected path is excluded from planning.
    pub fn scan(&self, root: &Path) -> Result<LocalIndex, SyncError> {
        let entries = fs::read_dir(root).map_err(|err| SyncError::fs(root, err))?;
        let mut index = LocalIndex::default();
        let mut pending: Vec<(PathBuf, fs::ReadDir)> = vec![(root.to_path_buf(), entries)];

        while let Some((dir, entries)) = pending.pop() {
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let relative = relative_path(root, &dir).unwrap_or_default();
                        index.warn(relative, &err);
                        continue;
                    }
                };
                let path = entry.path();
                let name = entry.file_name();
                if is_hidden_name(&name.to_string_lossy()) {
                    continue;
                }
                let Some(relative) = relative_path(root, &path) else {
                    debug!(path = %path.display(), "skipping non UTF-8 path");
                    continue;
                };
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        self.record_failure(&mut index, relative, &err);
                        continue;
                    }
                };

                if file_type.is_dir() {
                    match fs::read_dir(&path) {
                        Ok(children) => pending.push((path, children)),
                        Err(err) => self.record_failure(&mut index, relative, &err),
                    }
                } else if file_type.is_file() || is_symlinked_file(&path) {
                    self.scan_file(&mut index, &path, relative);
                }
            }
        }

        index.reserved.sort_by(|a, b| a.disk_path.cmp(&b.disk_path));
        index.unreadable.sort();
        index.unreadable.dedup();
        info!(
            root = %root.display(),
            managed = index.managed_files(),
            reserved = index.reserved.len(),
            unreadable = index.unreadable.len(),
            "scanned local files"
        );
        Ok(index)
    }

    pub async fn scan_async(&self, root: PathBuf) -> Result<LocalIndex, SyncError> {
        let scanner = LocalScanner::new(self.layout.clone());
        let join_root = root.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|err| SyncError::fs(join_root, io::Error::other(err)))?
    }

    fn scan_file(&self, index: &mut LocalIndex, path: &Path, relative: String) {
        let (logical_path, enabled) = self.layout.logical_path(&relative);
        if self.layout.is_reserved(&relative) {
            index.insert(LocalFileEntry {
                logical_path,
                disk_path: relative,
                content_hash: None,
                enabled,
                zone: Zone::UserReserved,
            });
            return;
        }

        match fs::read(path) {
            Ok(content) => index.insert(LocalFileEntry {
                logical_path,
                disk_path: relative,
                content_hash: Some(blob_sha1(&content)),
                enabled,
                zone: Zone::Managed,
            }),
            Err(err) => index.warn(relative, &err),
        }
    }

    fn record_failure(&self, index: &mut LocalIndex, relative: String, err: &io::Error) {
        if self.layout.is_reserved(&relative) {
            warn!(path = %relative, error = %err, "unreadable entry in reserved folder");
            return;
        }
        index.warn(relative, err);
    }
}

fn is_symlinked_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

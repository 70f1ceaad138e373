//! Reconciliation planning.
//!
//! [`DiffEngine::compute`] is a pure function of a [`LocalIndex`] and a
//! [`RemoteIndex`]: one pass over the remote entries decides downloads, one
//! pass over the local managed slots decides deletions. Both indices are
//! ordered maps, so the resulting plan is deterministic.
//!
//! A local file whose name starts with the disabled marker is the disabled
//! copy of the unmarked name, unless upstream ships the marked name itself;
//! an exact remote path always claims the file at that path.

use serde::Serialize;

use super::paths::{Layout, is_hidden};
use super::remote::RemoteIndex;
use super::scanner::{LocalFileEntry, LocalIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadItem {
    /// Logical path, relative to the sparse root.
    pub path: String,
    /// Write the content under the disabled name.
    pub to_disabled: bool,
    /// On-disk relative destination derived from `path` and `to_disabled`.
    pub disk_path: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub revision: String,
    pub to_download: Vec<DownloadItem>,
    /// On-disk relative paths.
    pub to_delete: Vec<String>,
    pub up_to_date_count: usize,
    /// Remote entries never mirrored: the user-reserved zone and hidden paths.
    pub ignored_remote: usize,
    /// Local paths that could not be read and were left out of the plan.
    pub skipped: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_up_to_date(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }

    pub fn total_operations(&self) -> usize {
        self.to_download.len() + self.to_delete.len()
    }
}

pub struct DiffEngine {
    layout: Layout,
}

impl DiffEngine {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn compute(&self, local: &LocalIndex, remote: &RemoteIndex) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan {
            revision: remote.revision.clone(),
            skipped: local.unreadable().to_vec(),
            ..ReconciliationPlan::default()
        };

        for entry in remote.iter() {
            if self.is_ignored(&entry.path) {
                plan.ignored_remote += 1;
                continue;
            }
            let disabled_path = self.layout.on_disk_path(&entry.path, false);
            if local.is_unreadable(&entry.path) || local.is_unreadable(&disabled_path) {
                continue;
            }

            let enabled = self.file_at(local, &entry.path);
            let disabled = if remote.contains(&disabled_path) {
                None
            } else {
                self.file_at(local, &disabled_path)
            };
            let to_disabled = match (enabled, disabled) {
                (Some(enabled), duplicate) => {
                    // The enabled copy is authoritative; a disabled twin is dropped.
                    if let Some(duplicate) = duplicate {
                        plan.to_delete.push(duplicate.disk_path.clone());
                    }
                    if enabled.content_hash.as_deref() == Some(entry.content_hash.as_str()) {
                        plan.up_to_date_count += 1;
                        continue;
                    }
                    false
                }
                (None, Some(disabled)) => {
                    if disabled.content_hash.as_deref() == Some(entry.content_hash.as_str()) {
                        plan.up_to_date_count += 1;
                        continue;
                    }
                    true
                }
                (None, None) => false,
            };

            plan.to_download.push(DownloadItem {
                disk_path: self.layout.on_disk_path(&entry.path, !to_disabled),
                path: entry.path,
                to_disabled,
                content_hash: entry.content_hash,
            });
        }

        for (_, slot) in local.managed() {
            for variant in [&slot.enabled, &slot.disabled].into_iter().flatten() {
                if local.is_unreadable(&variant.disk_path) || self.is_claimed(remote, variant) {
                    continue;
                }
                plan.to_delete.push(variant.disk_path.clone());
            }
        }

        plan.to_delete.sort();
        plan.to_delete.dedup();
        plan
    }

    fn is_ignored(&self, remote_path: &str) -> bool {
        self.layout.is_reserved(remote_path) || is_hidden(remote_path)
    }

    /// The scanned file stored at `disk_path`, whichever slot it landed in.
    fn file_at<'a>(&self, local: &'a LocalIndex, disk_path: &str) -> Option<&'a LocalFileEntry> {
        let (logical, enabled) = self.layout.logical_path(disk_path);
        let slot = local.slot(&logical)?;
        let variant = if enabled { &slot.enabled } else { &slot.disabled };
        variant.as_ref().filter(|file| file.disk_path == disk_path)
    }

    /// A local file is kept if upstream ships its exact path, or if it is the
    /// disabled copy of an upstream path.
    fn is_claimed(&self, remote: &RemoteIndex, file: &LocalFileEntry) -> bool {
        remote.contains(&file.disk_path) || (!file.enabled && remote.contains(&file.logical_path))
    }
}

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backoff::RetryPolicy;
use super::error::SyncError;
use super::paths::local_path_for;
use super::plan::{DownloadItem, ReconciliationPlan};
use super::progress::{ProgressEvent, ProgressReporter, Stage};
use super::remote::ContentFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub files_downloaded: u32,
    pub files_deleted: u32,
    pub files_skipped: u32,
    pub resulting_revision: String,
    pub status: OutcomeStatus,
    pub skipped_paths: Vec<String>,
}

impl SyncOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.status == OutcomeStatus::Cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "Downloaded: {}, Deleted: {}, Skipped: {}",
            self.files_downloaded, self.files_deleted, self.files_skipped
        )
    }
}

enum DeleteResult {
    Deleted,
    AlreadyGone,
}

/// Executes a [`ReconciliationPlan`] under `root`: every download first, then
/// every deletion. Cancellation is only observed between files.
pub struct Applier<'a, F: ?Sized> {
    fetcher: &'a F,
    root: PathBuf,
    retry: RetryPolicy,
}

impl<'a, F: ContentFetcher + ?Sized> Applier<'a, F> {
    pub fn new(fetcher: &'a F, root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            root: root.into(),
            retry,
        }
    }

    pub async fn apply<E: From<ProgressEvent>>(
        &self,
        plan: ReconciliationPlan,
        progress: &ProgressReporter<E>,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            files_downloaded: 0,
            files_deleted: 0,
            files_skipped: 0,
            resulting_revision: plan.revision.clone(),
            status: OutcomeStatus::Completed,
            skipped_paths: plan.skipped.clone(),
        };

        let total = plan.to_download.len() as u32;
        if total > 0 {
            progress.emit(ProgressEvent::counted(
                Stage::Downloading,
                format!("Downloading {total} files"),
                0,
                total,
            ));
        }
        for (i, item) in plan.to_download.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.status = OutcomeStatus::Cancelled;
                break;
            }
            let message = match self.download(&plan.revision, item).await {
                Ok(()) => {
                    outcome.files_downloaded += 1;
                    format!("Downloaded: {}", item.disk_path)
                }
                Err(err) => {
                    warn!(path = %item.disk_path, error = %err, "download failed, skipping");
                    outcome.skipped_paths.push(item.disk_path.clone());
                    format!("Skipped: {} ({err})", item.disk_path)
                }
            };
            progress.emit(ProgressEvent::counted(
                Stage::Downloading,
                message,
                i as u32 + 1,
                total,
            ));
        }

        let total = plan.to_delete.len() as u32;
        if outcome.status == OutcomeStatus::Completed && total > 0 {
            progress.emit(ProgressEvent::counted(
                Stage::Deleting,
                format!("Deleting {total} files"),
                0,
                total,
            ));
            for (i, path) in plan.to_delete.iter().enumerate() {
                if cancel.is_cancelled() {
                    outcome.status = OutcomeStatus::Cancelled;
                    break;
                }
                let message = match self.delete(path).await {
                    Ok(DeleteResult::Deleted) => {
                        outcome.files_deleted += 1;
                        format!("Deleted: {path}")
                    }
                    Ok(DeleteResult::AlreadyGone) => format!("Already gone: {path}"),
                    Err(err) => {
                        warn!(path = %path, error = %err, "delete failed, skipping");
                        outcome.skipped_paths.push(path.clone());
                        format!("Skipped: {path} ({err})")
                    }
                };
                progress.emit(ProgressEvent::counted(
                    Stage::Deleting,
                    message,
                    i as u32 + 1,
                    total,
                ));
            }
        }

        outcome.files_skipped = outcome.skipped_paths.len() as u32;
        info!(
            revision = %outcome.resulting_revision,
            downloaded = outcome.files_downloaded,
            deleted = outcome.files_deleted,
            skipped = outcome.files_skipped,
            status = ?outcome.status,
            "apply finished"
        );
        let message = match outcome.status {
            OutcomeStatus::Completed => format!("Sync complete! {}", outcome.summary()),
            OutcomeStatus::Cancelled => format!("Sync cancelled. {}", outcome.summary()),
        };
        progress.complete(message);
        outcome
    }

    async fn download(&self, revision: &str, item: &DownloadItem) -> Result<(), SyncError> {
        let target = local_path_for(&self.root, &item.disk_path)
            .map_err(|err| SyncError::InvalidMetadata(err.to_string()))?;
        let (fetcher, target) = (self.fetcher, target.as_path());
        self.retry
            .run_while(&item.disk_path, is_worth_retrying, move || {
                fetcher.fetch(revision, &item.path, &item.content_hash, target)
            })
            .await
    }

    async fn delete(&self, relative: &str) -> Result<DeleteResult, SyncError> {
        let target = local_path_for(&self.root, relative)
            .map_err(|err| SyncError::InvalidMetadata(err.to_string()))?;
        let path = &target;
        let result = self
            .retry
            .run_while(relative, is_worth_retrying, || async move {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => Ok(DeleteResult::Deleted),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        Ok(DeleteResult::AlreadyGone)
                    }
                    Err(err) => Err(SyncError::fs(path, err)),
                }
            })
            .await?;
        if let DeleteResult::Deleted = result {
            prune_empty_parents(&self.root, &target).await;
        }
        Ok(result)
    }
}

fn is_worth_retrying(err: &SyncError) -> bool {
    !matches!(
        err,
        SyncError::Cancelled | SyncError::Auth(_) | SyncError::NotFound(_)
    )
}

/// Removes now-empty directories between `file` and `root` (exclusive).
async fn prune_empty_parents(root: &Path, file: &Path) {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::paths::Layout;
    use crate::sync::plan::DiffEngine;
    use crate::sync::scanner::LocalScanner;
    use crate::sync::test_support::{MemoryRemote, write_file};
    use tempfile::tempdir;

    fn plan_for(root: &Path, remote: &MemoryRemote) -> ReconciliationPlan {
        let local = LocalScanner::new(Layout::default()).scan(root).unwrap();
        DiffEngine::new(Layout::default()).compute(&local, &remote.index())
    }

    fn events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn downloads_then_deletes_and_reports_progress() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.png", b"old");
        write_file(dir.path(), "gone/c.png", b"c");
        let remote = MemoryRemote::new("rev1")
            .with_file("a.png", b"new")
            .with_file("menus/b.png", b"b");

        let plan = plan_for(dir.path(), &remote);
        let (reporter, mut rx) = ProgressReporter::channel();
        let outcome = Applier::new(&remote, dir.path(), RetryPolicy::immediate(3))
            .apply(plan, &reporter, &CancellationToken::new())
            .await;

        assert_eq!(outcome.files_downloaded, 2);
        assert_eq!(outcome.files_deleted, 1);
        assert_eq!(outcome.files_skipped, 0);
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.resulting_revision, "rev1");
        assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), b"new");
        assert_eq!(std::fs::read(dir.path().join("menus/b.png")).unwrap(), b"b");
        assert!(!dir.path().join("gone").exists());

        let events = events(&mut rx);
        let stages: Vec<Stage> = events.iter().map(|event| event.stage).collect();
        let first_delete = stages.iter().position(|s| *s == Stage::Deleting).unwrap();
        let last_download = stages.iter().rposition(|s| *s == Stage::Downloading).unwrap();
        assert!(last_download < first_delete);
        assert_eq!(stages.last(), Some(&Stage::Complete));
        let completed: Vec<_> = events
            .iter()
            .filter(|event| event.stage == Stage::Downloading)
            .filter_map(|event| event.current)
            .collect();
        assert_eq!(completed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn disabled_file_keeps_its_disabled_name() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "menus/-b.png", b"old");
        let remote = MemoryRemote::new("rev2").with_file("menus/b.png", b"new");

        let plan = plan_for(dir.path(), &remote);
        assert!(plan.to_download[0].to_disabled);
        let outcome = Applier::new(&remote, dir.path(), RetryPolicy::immediate(1))
            .apply(plan, &ProgressReporter::<ProgressEvent>::silent(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.files_downloaded, 1);
        assert_eq!(std::fs::read(dir.path().join("menus/-b.png")).unwrap(), b"new");
        assert!(!dir.path().join("menus/b.png").exists());
    }

    #[tokio::test]
    async fn failing_file_is_retried_then_skipped() {
        let dir = tempdir().unwrap();
        let remote = MemoryRemote::new("rev1")
            .with_file("a.png", b"a")
            .with_file("bad.png", b"x")
            .with_file("c.png", b"c")
            .failing("bad.png");

        let plan = plan_for(dir.path(), &remote);
        let outcome = Applier::new(&remote, dir.path(), RetryPolicy::immediate(3))
            .apply(plan, &ProgressReporter::<ProgressEvent>::silent(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.files_downloaded, 2);
        assert_eq!(outcome.files_skipped, 1);
        assert_eq!(outcome.skipped_paths, vec!["bad.png"]);
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(remote.fetch_attempts("bad.png"), 3);
        assert!(!dir.path().join("bad.png").exists());
        assert!(dir.path().join("c.png").exists());
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let dir = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut remote = MemoryRemote::new("rev1");
        for i in 0..10 {
            remote = remote.with_file(&format!("t{i:02}.png"), format!("tex{i}").as_bytes());
        }
        write_file(dir.path(), "obsolete.png", b"o");
        let remote = remote.cancel_after(4, cancel.clone());

        let plan = plan_for(dir.path(), &remote);
        assert_eq!(plan.to_download.len(), 10);
        let (reporter, mut rx) = ProgressReporter::channel();
        let outcome = Applier::new(&remote, dir.path(), RetryPolicy::immediate(1))
            .apply(plan, &reporter, &cancel)
            .await;

        assert_eq!(outcome.files_downloaded, 4);
        assert_eq!(outcome.files_deleted, 0);
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        for i in 0..10 {
            let path = dir.path().join(format!("t{i:02}.png"));
            assert_eq!(path.exists(), i < 4, "{}", path.display());
        }
        assert!(dir.path().join("obsolete.png").exists());
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
        let events = events(&mut rx);
        assert_eq!(events.last().map(|event| event.stage), Some(Stage::Complete));
    }

    #[tokio::test]
    async fn vanished_file_is_not_counted_as_deleted() {
        let dir = tempdir().unwrap();
        let remote = MemoryRemote::new("rev1");
        let plan = ReconciliationPlan {
            revision: "rev1".into(),
            to_delete: vec!["never-existed.png".into()],
            ..ReconciliationPlan::default()
        };
        let outcome = Applier::new(&remote, dir.path(), RetryPolicy::immediate(1))
            .apply(plan, &ProgressReporter::<ProgressEvent>::silent(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.files_deleted, 0);
        assert_eq!(outcome.files_skipped, 0);
    }

    #[tokio::test]
    async fn pruning_stops_at_root_and_non_empty_dirs() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a/b/c.png", b"c");
        write_file(dir.path(), "a/keep.png", b"k");
        std::fs::remove_file(dir.path().join("a/b/c.png")).unwrap();

        prune_empty_parents(dir.path(), &dir.path().join("a/b/c.png")).await;

        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a/keep.png").exists());
        assert!(dir.path().exists());
    }
}

//! Operations exposed to front ends. Every operation takes the textures path
//! chosen by the user; the mirrored folder is `<textures_path>/<game_folder>`.
//!
//! Long-running workflows ([`TextureSync::start_installation`] and
//! [`TextureSync::run_sync`]) run on a spawned task and hand back a
//! [`SyncTask`]: an ordered event stream, a cancellation token and the join
//! handle carrying the final [`SyncOutcome`]. The last event of every
//! workflow, successful or not, has stage `complete`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::sync::apply::{Applier, SyncOutcome};
use crate::sync::backoff::RetryPolicy;
use crate::sync::backup;
use crate::sync::guard::lock_directory;
use crate::sync::paths::Layout;
use crate::sync::plan::{DiffEngine, ReconciliationPlan};
use crate::sync::progress::{InstallProgress, ProgressEvent, ProgressReporter, Stage};
use crate::sync::remote::{ContentFetcher, GithubRemote, RemoteIndexProvider};
use crate::sync::scanner::{LocalIndex, LocalScanner};
use crate::sync::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub latest_revision: String,
    pub files_to_download: usize,
    pub files_to_delete: usize,
    pub files_up_to_date: usize,
    pub is_up_to_date: bool,
}

impl From<&ReconciliationPlan> for SyncStatus {
    fn from(plan: &ReconciliationPlan) -> Self {
        Self {
            latest_revision: plan.revision.clone(),
            files_to_download: plan.to_download.len(),
            files_to_delete: plan.to_delete.len(),
            files_up_to_date: plan.up_to_date_count,
            is_up_to_date: plan.is_up_to_date(),
        }
    }
}

pub struct SyncTask<E> {
    pub events: mpsc::UnboundedReceiver<E>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<SyncOutcome, SyncError>>,
}

impl<E> SyncTask<E> {
    /// Waits for the worker. Events not yet received stay in `events`.
    pub async fn finish(self) -> Result<SyncOutcome, SyncError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}

pub struct TextureSync<R> {
    remote: Arc<R>,
    layout: Layout,
    file_retry: RetryPolicy,
}

impl TextureSync<GithubRemote> {
    pub fn from_config(config: &EngineConfig) -> Result<Self, SyncError> {
        Ok(Self::new(
            GithubRemote::from_config(config)?,
            config.layout.clone(),
            RetryPolicy::per_file(config.file_attempts),
        ))
    }
}

impl<R> TextureSync<R>
where
    R: RemoteIndexProvider + ContentFetcher + 'static,
{
    pub fn new(remote: R, layout: Layout, file_retry: RetryPolicy) -> Self {
        Self {
            remote: Arc::new(remote),
            layout,
            file_retry,
        }
    }

    pub fn target_dir(&self, textures_path: &Path) -> PathBuf {
        self.layout.target_dir(textures_path)
    }

    pub async fn resolve_latest_revision(&self) -> Result<String, SyncError> {
        self.remote.resolve_latest().await
    }

    pub fn check_existing_folder(&self, textures_path: &Path) -> bool {
        backup::exists(&self.target_dir(textures_path))
    }

    pub async fn backup_existing_folder(&self, textures_path: &Path) -> Result<String, SyncError> {
        let dir = self.target_dir(textures_path);
        let _guard = lock_directory(&dir).await;
        backup::backup(&dir).await
    }

    pub async fn delete_existing_folder(&self, textures_path: &Path) -> Result<(), SyncError> {
        let dir = self.target_dir(textures_path);
        let _guard = lock_directory(&dir).await;
        backup::delete(&dir).await
    }

    /// Computes the plan a sync would execute without touching the folder.
    pub async fn check_sync_status(&self, textures_path: &Path) -> Result<SyncStatus, SyncError> {
        let workflow = self.workflow(textures_path);
        let _guard = lock_directory(&workflow.dir).await;
        let plan = workflow
            .plan(
                &ProgressReporter::<ProgressEvent>::silent(),
                &CancellationToken::new(),
            )
            .await?;
        Ok(SyncStatus::from(&plan))
    }

    /// First-time installation into an absent folder. An existing folder must
    /// be backed up or deleted first.
    pub fn start_installation(
        &self,
        textures_path: &Path,
    ) -> Result<SyncTask<InstallProgress>, SyncError> {
        let workflow = self.workflow(textures_path);
        if backup::exists(&workflow.dir) {
            return Err(SyncError::Conflict(workflow.dir));
        }
        Ok(spawn_workflow(move |reporter, cancel| async move {
            let result = workflow.install(&reporter, &cancel).await;
            (reporter, result)
        }))
    }

    pub fn run_sync(&self, textures_path: &Path) -> SyncTask<ProgressEvent> {
        let workflow = self.workflow(textures_path);
        spawn_workflow(move |reporter, cancel| async move {
            let result = workflow.sync(&reporter, &cancel).await;
            (reporter, result)
        })
    }

    fn workflow(&self, textures_path: &Path) -> Workflow<R> {
        Workflow {
            remote: Arc::clone(&self.remote),
            layout: self.layout.clone(),
            file_retry: self.file_retry,
            dir: self.target_dir(textures_path),
        }
    }
}

fn spawn_workflow<E, F, Fut>(run: F) -> SyncTask<E>
where
    E: From<ProgressEvent> + Send + 'static,
    F: FnOnce(ProgressReporter<E>, CancellationToken) -> Fut,
    Fut: Future<Output = (ProgressReporter<E>, Result<SyncOutcome, SyncError>)> + Send + 'static,
{
    let (reporter, events) = ProgressReporter::channel();
    let cancel = CancellationToken::new();
    let work = run(reporter, cancel.clone());
    let handle = tokio::spawn(async move {
        let (reporter, result) = work.await;
        if let Err(err) = &result {
            warn!(error = %err, "workflow failed");
            reporter.complete(format!("Failed: {err}"));
        }
        result
    });
    SyncTask {
        events,
        cancel,
        handle,
    }
}

struct Workflow<R> {
    remote: Arc<R>,
    layout: Layout,
    file_retry: RetryPolicy,
    dir: PathBuf,
}

impl<R> Workflow<R>
where
    R: RemoteIndexProvider + ContentFetcher + 'static,
{
    async fn sync<E: From<ProgressEvent>>(
        self,
        reporter: &ProgressReporter<E>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = lock_directory(&self.dir).await;
        let plan = self.plan(reporter, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        info!(
            dir = %self.dir.display(),
            revision = %plan.revision,
            downloads = plan.to_download.len(),
            deletes = plan.to_delete.len(),
            operations = plan.total_operations(),
            "applying sync plan"
        );
        Ok(self.apply(plan, reporter, cancel).await)
    }

    async fn install<E: From<ProgressEvent>>(
        self,
        reporter: &ProgressReporter<E>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = lock_directory(&self.dir).await;
        if backup::exists(&self.dir) {
            return Err(SyncError::Conflict(self.dir.clone()));
        }

        reporter.stage(Stage::Fetching, "Fetching repository information...");
        let revision = self.remote.resolve_latest().await?;
        let remote = self.remote.list_entries(&revision).await?;
        reporter.stage(
            Stage::Fetching,
            format!("Found {} files in repository", remote.len()),
        );
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| SyncError::fs(&self.dir, err))?;
        let plan = DiffEngine::new(self.layout.clone()).compute(&LocalIndex::default(), &remote);
        info!(
            dir = %self.dir.display(),
            revision = %plan.revision,
            files = plan.to_download.len(),
            "installing textures"
        );
        Ok(self.apply(plan, reporter, cancel).await)
    }

    async fn plan<E: From<ProgressEvent>>(
        &self,
        reporter: &ProgressReporter<E>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationPlan, SyncError> {
        reporter.stage(Stage::Fetching, "Fetching repository information...");
        let revision = self.remote.resolve_latest().await?;
        let remote = self.remote.list_entries(&revision).await?;
        reporter.stage(
            Stage::Fetching,
            format!("Found {} files in repository", remote.len()),
        );
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        reporter.stage(Stage::Scanning, "Scanning local files...");
        let local = LocalScanner::new(self.layout.clone())
            .scan_async(self.dir.clone())
            .await?;
        reporter.stage(
            Stage::Scanning,
            format!(
                "Found {} local files (excluding {})",
                local.managed_files(),
                self.layout.reserved_dir
            ),
        );
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        reporter.stage(Stage::Comparing, "Comparing files...");
        let plan = DiffEngine::new(self.layout.clone()).compute(&local, &remote);
        reporter.stage(
            Stage::Comparing,
            format!(
                "Changes: {} to download, {} to delete, {} up to date",
                plan.to_download.len(),
                plan.to_delete.len(),
                plan.up_to_date_count
            ),
        );
        Ok(plan)
    }

    async fn apply<E: From<ProgressEvent>>(
        &self,
        plan: ReconciliationPlan,
        reporter: &ProgressReporter<E>,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        Applier::new(self.remote.as_ref(), &self.dir, self.file_retry)
            .apply(plan, reporter, cancel)
            .await
    }
}

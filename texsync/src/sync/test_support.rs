//! In-memory remote used by the engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use texsync_core::blob_sha1;
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::remote::{ContentFetcher, RemoteIndex, RemoteIndexProvider};
use super::transfer::partial_path;

pub(crate) fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub(crate) struct MemoryRemote {
    revision: Mutex<String>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    attempts: Mutex<HashMap<String, u32>>,
    fetched: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub(crate) fn new(revision: &str) -> Self {
        Self {
            revision: Mutex::new(revision.to_string()),
            files: Mutex::new(BTreeMap::new()),
            failing: HashSet::new(),
            attempts: Mutex::new(HashMap::new()),
            fetched: AtomicUsize::new(0),
            cancel_after: None,
            offline: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        self
    }

    /// Every fetch of `path` fails with a transient error.
    pub(crate) fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Cancels `token` once `count` files have been fetched.
    pub(crate) fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    /// Replaces the published content with a new revision.
    pub(crate) fn publish(&self, revision: &str, files: &[(&str, &[u8])]) {
        *self.revision.lock().unwrap() = revision.to_string();
        let mut current = self.files.lock().unwrap();
        current.clear();
        for (path, content) in files {
            current.insert(path.to_string(), content.to_vec());
        }
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn index(&self) -> RemoteIndex {
        let mut index = RemoteIndex::new(self.revision.lock().unwrap().clone());
        for (path, content) in self.files.lock().unwrap().iter() {
            index.insert(path.clone(), blob_sha1(content));
        }
        index
    }

    pub(crate) fn fetch_attempts(&self, path: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteIndexProvider for MemoryRemote {
    async fn resolve_latest(&self) -> Result<String, SyncError> {
        self.check_online()?;
        Ok(self.revision.lock().unwrap().clone())
    }

    async fn list_entries(&self, revision: &str) -> Result<RemoteIndex, SyncError> {
        self.check_online()?;
        let index = self.index();
        if index.revision != revision {
            return Err(SyncError::NotFound(format!("revision {revision}")));
        }
        Ok(index)
    }
}

#[async_trait]
impl ContentFetcher for MemoryRemote {
    async fn fetch(
        &self,
        _revision: &str,
        path: &str,
        expected_hash: &str,
        target: &Path,
    ) -> Result<(), SyncError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        self.check_online()?;
        if self.failing.contains(path) {
            return Err(SyncError::Unreachable(format!("{path}: connection reset")));
        }
        let content = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        if blob_sha1(&content) != expected_hash {
            return Err(SyncError::InvalidMetadata(format!("{path}: hash mismatch")));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SyncError::fs(parent, err))?;
        }
        let partial = partial_path(target);
        tokio::fs::write(&partial, &content)
            .await
            .map_err(|err| SyncError::fs(&partial, err))?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|err| SyncError::fs(target, err))?;

        let fetched = self.fetched.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if fetched >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }
}

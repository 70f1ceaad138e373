use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

static DIRECTORY_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Held for the whole of a workflow touching one target directory.
pub struct DirectoryGuard {
    path: PathBuf,
    guard: OwnedMutexGuard<()>,
}

impl DirectoryGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        let mutex = OwnedMutexGuard::mutex(&self.guard);
        let mut locks = DIRECTORY_LOCKS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map and one here: nobody is waiting.
        let idle = locks
            .get(&self.path)
            .is_some_and(|entry| Arc::ptr_eq(entry, mutex) && Arc::strong_count(mutex) == 2);
        if idle {
            locks.remove(&self.path);
        }
        debug!(path = %self.path.display(), "released directory lock");
    }
}

/// Waits until no other workflow holds `dir`.
pub async fn lock_directory(dir: &Path) -> DirectoryGuard {
    let key = lock_key(dir);
    let lock = {
        let mut locks = DIRECTORY_LOCKS
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    };
    let guard = lock.lock_owned().await;
    debug!(path = %key.display(), "acquired directory lock");
    DirectoryGuard {
        path: key,
        guard,
    }
}

/// Canonical form of `dir`. The directory may not exist yet (first install),
/// so the nearest existing ancestor is canonicalized instead.
fn lock_key(dir: &Path) -> PathBuf {
    if let Ok(canonical) = dir.canonicalize() {
        return canonical;
    }
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            lock_key(parent).join(name)
        }
        _ => dir.to_path_buf(),
    }
}

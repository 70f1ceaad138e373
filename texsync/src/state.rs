//! The caller-owned record that survives between runs: where the textures
//! live, whether the first install happened and which revision was last
//! applied. The engine never reads or writes it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sync::apply::SyncOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSyncState {
    /// Parent of the mirrored game folder.
    pub textures_path: Option<String>,
    pub initial_setup_done: bool,
    pub last_synced_revision: Option<String>,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields the default state.
    pub fn load(&self) -> Result<PersistedSyncState, StateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PersistedSyncState::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        serde_json::from_str(&contents).map_err(|source| StateError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes a sibling temp file and renames it over the state file.
    pub fn save(&self, state: &PersistedSyncState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let contents = serde_json::to_string_pretty(state).map_err(|source| {
            StateError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, contents).map_err(|err| self.io_error(err))?;
        fs::rename(&temp, &self.path).map_err(|err| self.io_error(err))?;
        debug!(path = %self.path.display(), "saved sync state");
        Ok(())
    }

    pub fn set_textures_path(&self, path: &str) -> Result<PersistedSyncState, StateError> {
        self.update(|state| state.textures_path = Some(path.to_string()))
    }

    pub fn mark_setup_complete(&self, revision: &str) -> Result<PersistedSyncState, StateError> {
        self.update(|state| {
            state.initial_setup_done = true;
            state.last_synced_revision = Some(revision.to_string());
        })
    }

    /// For users whose textures were installed by other means.
    pub fn set_initial_setup_done(&self, done: bool) -> Result<PersistedSyncState, StateError> {
        self.update(|state| state.initial_setup_done = done)
    }

    /// Advances `last_synced_revision` after a completed run. A cancelled run
    /// only advances it when `acknowledge_partial` is set.
    pub fn record_sync(
        &self,
        outcome: &SyncOutcome,
        acknowledge_partial: bool,
    ) -> Result<PersistedSyncState, StateError> {
        if outcome.is_cancelled() && !acknowledge_partial {
            return self.load();
        }
        self.update(|state| state.last_synced_revision = Some(outcome.resulting_revision.clone()))
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut PersistedSyncState),
    ) -> Result<PersistedSyncState, StateError> {
        let mut state = self.load()?;
        apply(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    fn io_error(&self, source: io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

use std::io;
use std::path::PathBuf;

use texsync_core::{ApiErrorClass, GithubError};
use thiserror::Error;

use super::transfer::TransferError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote is unreachable: {0}")]
    Unreachable(String),
    #[error("remote rejected credentials: {0}")]
    Auth(String),
    #[error("not found upstream: {0}")]
    NotFound(String),
    #[error("invalid remote metadata: {0}")]
    InvalidMetadata(String),
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("folder already exists: {0}; back it up or delete it before installing")]
    Conflict(PathBuf),
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Only transient network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Unreachable(_))
    }
}

impl From<GithubError> for SyncError {
    fn from(err: GithubError) -> Self {
        if err.is_retryable() {
            return SyncError::Unreachable(err.to_string());
        }
        match err.classification() {
            ApiErrorClass::Auth => SyncError::Auth(err.to_string()),
            ApiErrorClass::NotFound => SyncError::NotFound(err.to_string()),
            _ => SyncError::InvalidMetadata(err.to_string()),
        }
    }
}

impl From<TransferError> for SyncError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Api(err) => err.into(),
            TransferError::Request(err) => GithubError::Request(err).into(),
            TransferError::Io { path, source } => SyncError::Filesystem { path, source },
            TransferError::IntegrityMismatch { .. } => SyncError::InvalidMetadata(err.to_string()),
            TransferError::ConcurrencyClosed => SyncError::Cancelled,
        }
    }
}

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_util::StreamExt;
use texsync_core::{GithubClient, GithubError, blob_sha1};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("api error: {0}")]
    Api(#[from] GithubError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone)]
pub struct TransferClient {
    github: GithubClient,
    download_limit: Arc<Semaphore>,
}

impl TransferClient {
    pub fn new(github: GithubClient, download_concurrency: usize) -> Self {
        Self {
            github,
            download_limit: Arc::new(Semaphore::new(download_concurrency.max(1))),
        }
    }

    /// Streams `url` into `<target>.partial`, checks the git blob id when
    /// `expected_blob` is given, then renames over `target`.
    pub async fn download_to_path_checked(
        &self,
        url: Url,
        target: &Path,
        expected_blob: Option<&str>,
    ) -> Result<(), TransferError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;
        let response = self.github.download(url).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_at(parent))?;
        }
        let partial = partial_path(target);
        let result = write_stream(response, &partial).await;
        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        if let Some(expected) = expected_blob {
            let content = tokio::fs::read(&partial).await.map_err(io_at(&partial))?;
            let actual = blob_sha1(&content);
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(TransferError::IntegrityMismatch {
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }

        tokio::fs::rename(&partial, target)
            .await
            .map_err(io_at(target))?;
        Ok(())
    }
}

async fn write_stream(response: reqwest::Response, partial: &Path) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(io_at(partial))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_at(partial))?;
    }
    file.flush().await.map_err(io_at(partial))?;
    file.sync_all().await.map_err(io_at(partial))?;
    Ok(())
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

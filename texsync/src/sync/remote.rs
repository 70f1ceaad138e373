use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use texsync_core::{EntryType, GithubClient, Tree};
use tracing::{debug, info};

use super::backoff::RetryPolicy;
use super::error::SyncError;
use super::transfer::TransferClient;
use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileEntry {
    /// Relative to the sparse root, `/`-separated.
    pub path: String,
    pub content_hash: String,
}

/// Remote file set of one revision, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    pub revision: String,
    entries: BTreeMap<String, String>,
}

impl RemoteIndex {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, content_hash: impl Into<String>) {
        self.entries.insert(path.into(), content_hash.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RemoteFileEntry> + '_ {
        self.entries.iter().map(|(path, hash)| RemoteFileEntry {
            path: path.clone(),
            content_hash: hash.clone(),
        })
    }
}

#[async_trait]
pub trait RemoteIndexProvider: Send + Sync {
    async fn resolve_latest(&self) -> Result<String, SyncError>;

    /// Enumerates the sparse path at `revision`. Fails with the same error
    /// kinds as [`RemoteIndexProvider::resolve_latest`].
    async fn list_entries(&self, revision: &str) -> Result<RemoteIndex, SyncError>;
}

/// Places the content of `path` at `revision` on `target`. Implementations
/// must never leave a partially written file at `target`.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        expected_hash: &str,
        target: &Path,
    ) -> Result<(), SyncError>;
}

pub struct GithubRemote {
    client: GithubClient,
    transfer: TransferClient,
    branch: String,
    sparse_path: String,
    retry: RetryPolicy,
}

impl GithubRemote {
    pub fn new(
        client: GithubClient,
        transfer: TransferClient,
        branch: impl Into<String>,
        sparse_path: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            transfer,
            branch: branch.into(),
            sparse_path: sparse_path.into().trim_matches('/').to_string(),
            retry,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, SyncError> {
        let client = GithubClient::new(config.client_options())?;
        let transfer = TransferClient::new(client.clone(), config.download_concurrency);
        Ok(Self::new(
            client,
            transfer,
            &config.branch,
            &config.sparse_path,
            RetryPolicy::network(config.network_attempts),
        ))
    }

    async fn tree(&self, sha: &str, recursive: bool) -> Result<Tree, SyncError> {
        self.retry
            .run("tree", || async move {
                Ok(self.client.get_tree(sha, recursive).await?)
            })
            .await
    }

    /// Walks the sparse path one component at a time.
    async fn subtree_sha(&self, revision: &str) -> Result<String, SyncError> {
        let mut current = revision.to_string();
        for part in self.sparse_path.split('/').filter(|part| !part.is_empty()) {
            let tree = self.tree(&current, false).await?;
            let entry = tree
                .tree
                .into_iter()
                .find(|entry| entry.path == part && entry.entry_type == EntryType::Tree)
                .ok_or_else(|| {
                    SyncError::NotFound(format!(
                        "path component '{part}' of '{}' at {revision}",
                        self.sparse_path
                    ))
                })?;
            current = entry.sha;
        }
        Ok(current)
    }
}

#[async_trait]
impl RemoteIndexProvider for GithubRemote {
    async fn resolve_latest(&self) -> Result<String, SyncError> {
        let commit = self
            .retry
            .run("latest commit", || async move {
                Ok(self.client.latest_commit(&self.branch).await?)
            })
            .await?;
        validate_sha(&commit.sha)?;
        Ok(commit.sha)
    }

    async fn list_entries(&self, revision: &str) -> Result<RemoteIndex, SyncError> {
        let root = self.subtree_sha(revision).await?;
        let mut index = RemoteIndex::new(revision);
        let mut pending = vec![(root, String::new())];

        while let Some((sha, base)) = pending.pop() {
            let tree = self.tree(&sha, true).await?;
            if !tree.truncated {
                for entry in tree.tree {
                    if entry.entry_type == EntryType::Blob {
                        insert_blob(&mut index, &base, &entry.path, entry.sha)?;
                    }
                }
                continue;
            }

            // Recursive listing hit GitHub's size cap; descend one level at a time.
            debug!(tree = %sha, base = %base, "tree listing truncated");
            let shallow = self.tree(&sha, false).await?;
            for entry in shallow.tree {
                match entry.entry_type {
                    EntryType::Blob => insert_blob(&mut index, &base, &entry.path, entry.sha)?,
                    EntryType::Tree => pending.push((entry.sha, join(&base, &entry.path))),
                    EntryType::Commit => {}
                }
            }
        }

        info!(revision, files = index.len(), "listed remote entries");
        Ok(index)
    }
}

#[async_trait]
impl ContentFetcher for GithubRemote {
    async fn fetch(
        &self,
        revision: &str,
        path: &str,
        expected_hash: &str,
        target: &Path,
    ) -> Result<(), SyncError> {
        let source = join(&self.sparse_path, path);
        let url = self.client.raw_url(revision, &source)?;
        self.transfer
            .download_to_path_checked(url, target, Some(expected_hash))
            .await?;
        Ok(())
    }
}

fn join(base: &str, path: &str) -> String {
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{base}/{path}")
    }
}

fn insert_blob(
    index: &mut RemoteIndex,
    base: &str,
    path: &str,
    sha: String,
) -> Result<(), SyncError> {
    if path
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(SyncError::InvalidMetadata(format!(
            "unsafe path in tree: {path}"
        )));
    }
    validate_sha(&sha)?;
    index.insert(join(base, path), sha.to_ascii_lowercase());
    Ok(())
}

fn validate_sha(sha: &str) -> Result<(), SyncError> {
    if sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(SyncError::InvalidMetadata(format!("malformed object id: {sha}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use texsync_core::{ClientOptions, blob_sha1};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REV: &str = "1111111111111111111111111111111111111111";
    const TEXTURES: &str = "2222222222222222222222222222222222222222";
    const SLUS: &str = "3333333333333333333333333333333333333333";
    const SUB: &str = "4444444444444444444444444444444444444444";
    const BLOB_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BLOB_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn remote_for(server: &MockServer) -> GithubRemote {
        let client =
            GithubClient::new(ClientOptions::new("o", "r").with_base_url(&server.uri())).unwrap();
        let transfer = TransferClient::new(client.clone(), 2);
        GithubRemote::new(
            client,
            transfer,
            "main",
            "textures/SLUS",
            RetryPolicy::immediate(2),
        )
    }

    async fn mount_tree(server: &MockServer, sha: &str, recursive: bool, body: serde_json::Value) {
        let mock = Mock::given(method("GET")).and(path(format!("/repos/o/r/git/trees/{sha}")));
        let mock = if recursive {
            mock.and(query_param("recursive", "1"))
        } else {
            mock
        };
        mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_sparse_path(server: &MockServer) {
        mount_tree(
            server,
            REV,
            false,
            json!({ "sha": REV, "truncated": false, "tree": [
                { "path": "README.md", "type": "blob", "sha": BLOB_A },
                { "path": "textures", "type": "tree", "sha": TEXTURES }
            ]}),
        )
        .await;
        mount_tree(
            server,
            TEXTURES,
            false,
            json!({ "sha": TEXTURES, "truncated": false, "tree": [
                { "path": "SLUS", "type": "tree", "sha": SLUS }
            ]}),
        )
        .await;
    }

    #[tokio::test]
    async fn resolve_latest_returns_head_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/commits/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sha": REV })))
            .mount(&server)
            .await;

        assert_eq!(remote_for(&server).resolve_latest().await.unwrap(), REV);
    }

    #[tokio::test]
    async fn resolve_latest_gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/o/r/commits/main"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = remote_for(&server).resolve_latest().await.unwrap_err();
        assert!(matches!(err, SyncError::Unreachable(_)));
    }

    #[tokio::test]
    async fn list_entries_navigates_sparse_path_and_keeps_blobs_only() {
        let server = MockServer::start().await;
        mount_sparse_path(&server).await;
        mount_tree(
            &server,
            SLUS,
            true,
            json!({ "sha": SLUS, "truncated": false, "tree": [
                { "path": "a.png", "type": "blob", "sha": BLOB_A },
                { "path": "sub", "type": "tree", "sha": SUB },
                { "path": "sub/b.png", "type": "blob", "sha": BLOB_B }
            ]}),
        )
        .await;

        let index = remote_for(&server).list_entries(REV).await.unwrap();

        assert_eq!(index.revision, REV);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a.png"), Some(BLOB_A));
        assert_eq!(index.get("sub/b.png"), Some(BLOB_B));
        assert!(!index.contains("sub"));
    }

    #[tokio::test]
    async fn truncated_listing_descends_per_subtree() {
        let server = MockServer::start().await;
        mount_sparse_path(&server).await;
        mount_tree(
            &server,
            SLUS,
            true,
            json!({ "sha": SLUS, "truncated": true, "tree": [] }),
        )
        .await;
        mount_tree(
            &server,
            SLUS,
            false,
            json!({ "sha": SLUS, "truncated": false, "tree": [
                { "path": "a.png", "type": "blob", "sha": BLOB_A },
                { "path": "sub", "type": "tree", "sha": SUB }
            ]}),
        )
        .await;
        mount_tree(
            &server,
            SUB,
            true,
            json!({ "sha": SUB, "truncated": false, "tree": [
                { "path": "b.png", "type": "blob", "sha": BLOB_B }
            ]}),
        )
        .await;

        let index = remote_for(&server).list_entries(REV).await.unwrap();

        let paths: Vec<_> = index.iter().map(|entry| entry.path).collect();
        assert_eq!(paths, vec!["a.png", "sub/b.png"]);
    }

    #[tokio::test]
    async fn missing_sparse_component_is_not_found() {
        let server = MockServer::start().await;
        mount_tree(
            &server,
            REV,
            false,
            json!({ "sha": REV, "truncated": false, "tree": [
                { "path": "docs", "type": "tree", "sha": TEXTURES }
            ]}),
        )
        .await;

        let err = remote_for(&server).list_entries(REV).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_blob_id_is_invalid_metadata() {
        let server = MockServer::start().await;
        mount_sparse_path(&server).await;
        mount_tree(
            &server,
            SLUS,
            true,
            json!({ "sha": SLUS, "truncated": false, "tree": [
                { "path": "a.png", "type": "blob", "sha": "not-a-sha" }
            ]}),
        )
        .await;

        let err = remote_for(&server).list_entries(REV).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMetadata(_)));
    }

    #[tokio::test]
    async fn fetch_downloads_from_pinned_revision() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/o/r/{REV}/textures/SLUS/sub/b.png")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"texture"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("sub/-b.png");
        remote_for(&server)
            .fetch(REV, "sub/b.png", &blob_sha1(b"texture"), &target)
            .await
            .unwrap();

        assert_eq!(std::fs::read(target).unwrap(), b"texture");
    }
}

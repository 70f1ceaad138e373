use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const DEFAULT_USER_AGENT: &str = concat!("texsync/", env!("CARGO_PKG_VERSION"));
const ACCEPT_V3: &str = "application/vnd.github.v3+json";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("rate limit exhausted ({status}): {body}")]
    RateLimited { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    NotFound,
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base: String,
    pub raw_base: String,
    pub owner: String,
    pub repo: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            token: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Points both the API and raw-content hosts at `base_url` (used by tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.api_base = base_url.to_string();
        self.raw_base = base_url.to_string();
        self
    }
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    api_base: Url,
    raw_base: Url,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(options: ClientOptions) -> Result<Self, GithubError> {
        let http = Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;
        Self::with_http(http, options)
    }

    pub fn with_http(http: Client, options: ClientOptions) -> Result<Self, GithubError> {
        Ok(Self {
            http,
            api_base: Url::parse(&options.api_base)?,
            raw_base: Url::parse(&options.raw_base)?,
            owner: options.owner,
            repo: options.repo,
            token: options.token,
        })
    }

    /// Head commit of `branch`.
    pub async fn latest_commit(&self, branch: &str) -> Result<Commit, GithubError> {
        let url = self.endpoint(&format!(
            "/repos/{}/{}/commits/{}",
            self.owner, self.repo, branch
        ))?;
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    /// Reads a tree object. `tree_ish` may be a tree or commit SHA.
    pub async fn get_tree(&self, tree_ish: &str, recursive: bool) -> Result<Tree, GithubError> {
        let mut url = self.endpoint(&format!(
            "/repos/{}/{}/git/trees/{}",
            self.owner, self.repo, tree_ish
        ))?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_response(response).await
    }

    /// Raw-content URL of `path` at `revision`. Path segments are percent-encoded.
    pub fn raw_url(&self, revision: &str, path: &str) -> Result<Url, GithubError> {
        let mut url = self.raw_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            segments.push(&self.owner).push(&self.repo).push(revision);
            for part in path.split('/').filter(|part| !part.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }

    pub async fn download(&self, url: Url) -> Result<reqwest::Response, GithubError> {
        let response = self.authorized(self.http.get(url)).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", ACCEPT_V3);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GithubError> {
        Ok(self.api_base.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GithubError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    /// GitHub reports an exhausted primary rate limit as 403 with
    /// `x-ratelimit-remaining: 0`.
    async fn api_error(response: reqwest::Response) -> GithubError {
        let status = response.status();
        let exhausted = response
            .headers()
            .get(RATE_LIMIT_REMAINING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim() == "0");
        let body = response.text().await.unwrap_or_default();
        if exhausted && matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS) {
            GithubError::RateLimited { status, body }
        } else {
            GithubError::Api { status, body }
        }
    }
}

impl GithubError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            GithubError::Api { status, .. } => classify_api_status(*status),
            GithubError::RateLimited { .. } => ApiErrorClass::RateLimit,
            GithubError::Request(err) if err.is_timeout() || err.is_connect() => {
                ApiErrorClass::Transient
            }
            GithubError::Request(err) if err.is_decode() => ApiErrorClass::Permanent,
            GithubError::Request(err) => match err.status() {
                Some(status) => classify_api_status(status),
                None => ApiErrorClass::Transient,
            },
            GithubError::Url(_) => ApiErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            ApiErrorClass::RateLimit | ApiErrorClass::Transient
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY) {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Commit {
    pub sha: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Tree {
    pub sha: String,
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Blob,
    Tree,
    Commit,
}

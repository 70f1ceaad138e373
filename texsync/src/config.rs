use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use texsync_core::ClientOptions;

use crate::sync::paths::Layout;

const DEFAULT_REPO_OWNER: &str = "maddendeluxe";
const DEFAULT_REPO_NAME: &str = "madden09deluxe";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_SPARSE_PATH: &str = "textures/SLUS-21770";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_NETWORK_ATTEMPTS: u32 = 3;
const DEFAULT_FILE_ATTEMPTS: u32 = 3;
const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub repo_owner: String,
    pub repo_name: String,
    pub branch: String,
    /// Subtree of the repository that is mirrored locally.
    pub sparse_path: String,
    pub layout: Layout,
    pub api_base: Option<String>,
    pub raw_base: Option<String>,
    pub github_token: Option<String>,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub network_attempts: u32,
    pub file_attempts: u32,
    pub download_concurrency: usize,
    pub state_file: PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let state_file = std::env::var("TEXSYNC_STATE_FILE")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_state_file);
        let defaults = Layout::default();
        let disabled_marker =
            read_string_env("TEXSYNC_DISABLED_MARKER", &defaults.disabled_marker);
        anyhow::ensure!(
            !disabled_marker.is_empty() && !disabled_marker.contains('/'),
            "TEXSYNC_DISABLED_MARKER must be a non-empty file name prefix"
        );

        Ok(Self {
            repo_owner: read_string_env("TEXSYNC_REPO_OWNER", DEFAULT_REPO_OWNER),
            repo_name: read_string_env("TEXSYNC_REPO_NAME", DEFAULT_REPO_NAME),
            branch: read_string_env("TEXSYNC_BRANCH", DEFAULT_BRANCH),
            sparse_path: read_string_env("TEXSYNC_SPARSE_PATH", DEFAULT_SPARSE_PATH)
                .trim_matches('/')
                .to_string(),
            layout: Layout {
                game_folder: read_string_env("TEXSYNC_GAME_FOLDER", &defaults.game_folder),
                reserved_dir: read_string_env("TEXSYNC_RESERVED_DIR", &defaults.reserved_dir),
                disabled_marker,
            },
            api_base: std::env::var("TEXSYNC_API_BASE").ok(),
            raw_base: std::env::var("TEXSYNC_RAW_BASE").ok(),
            github_token: std::env::var("TEXSYNC_GITHUB_TOKEN")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            http_timeout: Duration::from_secs(read_u64_env(
                "TEXSYNC_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            network_attempts: read_count_env("TEXSYNC_NETWORK_ATTEMPTS", DEFAULT_NETWORK_ATTEMPTS),
            file_attempts: read_count_env("TEXSYNC_FILE_ATTEMPTS", DEFAULT_FILE_ATTEMPTS),
            download_concurrency: read_count_env(
                "TEXSYNC_DOWNLOAD_CONCURRENCY",
                DEFAULT_DOWNLOAD_CONCURRENCY,
            ),
            state_file,
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(&self.repo_owner, &self.repo_name);
        if let Some(api_base) = &self.api_base {
            options.api_base = api_base.clone();
        }
        if let Some(raw_base) = &self.raw_base {
            options.raw_base = raw_base.clone();
        }
        options.token = self.github_token.clone();
        options.timeout = self.http_timeout;
        options.connect_timeout = self.connect_timeout;
        options
    }
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("texsync")
        .join("state.json")
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_string_env(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    parse_count(std::env::var(name).ok().as_deref(), default)
}

fn read_count_env<T: TryFrom<u64>>(name: &str, default: T) -> T {
    parse_count(std::env::var(name).ok().as_deref(), default)
}

/// Positive integer that fits `T`; anything else falls back to `default`.
fn parse_count<T: TryFrom<u64>>(value: Option<&str>, default: T) -> T {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .and_then(|value| T::try_from(value).ok())
        .unwrap_or(default)
}

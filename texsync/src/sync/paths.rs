use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Naming rules of the mirrored folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Folder under the textures path that mirrors the sparse path.
    pub game_folder: String,
    /// Top-level subfolder reserved for the user's own content.
    pub reserved_dir: String,
    /// File name prefix that marks a managed file as disabled.
    pub disabled_marker: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            game_folder: "SLUS-21770".to_string(),
            reserved_dir: "user-customs".to_string(),
            disabled_marker: "-".to_string(),
        }
    }
}

impl Layout {
    pub fn target_dir(&self, textures_path: &Path) -> PathBuf {
        textures_path.join(&self.game_folder)
    }

    pub fn is_reserved(&self, relative: &str) -> bool {
        relative.split('/').next() == Some(self.reserved_dir.as_str())
    }

    /// Splits an on-disk relative path into `(logical_path, enabled)`.
    pub fn logical_path(&self, relative: &str) -> (String, bool) {
        let (dir, name) = split_name(relative);
        match name.strip_prefix(self.disabled_marker.as_str()) {
            Some(stripped) if !stripped.is_empty() => (format!("{dir}{stripped}"), false),
            _ => (relative.to_string(), true),
        }
    }

    /// On-disk relative path for a logical path in the given state.
    pub fn on_disk_path(&self, logical: &str, enabled: bool) -> String {
        if enabled {
            return logical.to_string();
        }
        let (dir, name) = split_name(logical);
        format!("{dir}{}{name}", self.disabled_marker)
    }
}

/// Dot-prefixed names (`.git`, `.gitkeep`, `.DS_Store`) are never mirrored.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// True if any component of a `/`-separated relative path is hidden.
pub fn is_hidden(relative: &str) -> bool {
    relative.split('/').any(is_hidden_name)
}

fn split_name(relative: &str) -> (&str, &str) {
    match relative.rfind('/') {
        Some(pos) => (&relative[..=pos], &relative[pos + 1..]),
        None => ("", relative),
    }
}

/// Maps a `/`-separated relative path under `root`, refusing to escape it.
pub fn local_path_for(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    if relative.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(relative.to_string()));
            }
        }
    }
    if out == root {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// `/`-separated form of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().map(str::to_string),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

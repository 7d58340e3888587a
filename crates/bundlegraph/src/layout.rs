//! Project folder layout and path normalization.

use crate::BuildTargetGroup;
use std::path::{Component, Path, PathBuf};

pub const ASSETS_FOLDER: &str = "Assets";
pub const TOOL_FOLDER: &str = "Assets/BundleGraph";
pub const CACHE_ROOT: &str = "Assets/BundleGraph/Cache";
pub const BUNDLE_BUILDER_CACHE: &str = "Assets/BundleGraph/Cache/BundleBuilder";
pub const PREFAB_BUILDER_CACHE: &str = "Assets/BundleGraph/Cache/PrefabBuilder";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    pub project_root: PathBuf,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ProjectLayout {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn assets_root(&self) -> PathBuf {
        self.project_root.join(ASSETS_FOLDER)
    }

    /// Project-relative path (forward slashes) to an absolute path.
    pub fn absolute(&self, relative_path: &str) -> PathBuf {
        let mut path = self.project_root.clone();
        for part in normalize_separators(relative_path)
            .split('/')
            .filter(|part| !part.is_empty())
        {
            path.push(part);
        }
        path
    }

    /// Absolute path under the project root to a forward-slash relative path.
    pub fn relative(&self, absolute_path: &Path) -> Option<String> {
        let stripped = absolute_path.strip_prefix(&self.project_root).ok()?;
        let parts: Vec<String> = stripped
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Absolute directory a loader path points at. The path is relative to the
    /// asset root and must stay inside it.
    pub fn loader_root(&self, load_path: &str) -> Result<PathBuf, String> {
        let normalized = normalize_separators(load_path.trim());
        if normalized.starts_with('/') || Path::new(&normalized).is_absolute() {
            return Err(format!("load path '{load_path}' must be relative to {ASSETS_FOLDER}/"));
        }
        let relative = normalized
            .strip_prefix(ASSETS_FOLDER)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(&normalized);
        if relative.split('/').any(|part| part == "..") {
            return Err(format!("load path '{load_path}' escapes {ASSETS_FOLDER}/"));
        }

        let mut root = self.assets_root();
        for part in relative.split('/').filter(|part| !part.is_empty() && *part != ".") {
            root.push(part);
        }
        Ok(root)
    }

    /// Export destination; relative export paths resolve against the project root.
    pub fn resolve_export_path(&self, export_path: &str) -> PathBuf {
        let trimmed = export_path.trim();
        let path = Path::new(trimmed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.absolute(trimmed)
        }
    }

    pub fn bundle_cache_dir(&self, target: BuildTargetGroup) -> PathBuf {
        self.absolute(BUNDLE_BUILDER_CACHE).join(target.as_str())
    }

    pub fn prefab_cache_dir(&self, target: BuildTargetGroup, node_id: &str) -> PathBuf {
        self.absolute(PREFAB_BUILDER_CACHE)
            .join(target.as_str())
            .join(node_id)
    }
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// True for paths inside the tool's own folder, which loaders never pick up.
pub fn is_internal_path(relative_path: &str) -> bool {
    let normalized = normalize_separators(relative_path);
    normalized == TOOL_FOLDER || normalized.starts_with(&format!("{TOOL_FOLDER}/"))
}

/// Drops the bundle-builder cache root and the platform folder below it.
/// Paths outside the cache come back unchanged.
pub fn strip_bundle_cache_prefix(relative_path: &str) -> String {
    let normalized = normalize_separators(relative_path);
    let Some(rest) = normalized.strip_prefix(BUNDLE_BUILDER_CACHE) else {
        return normalized;
    };
    let Some(rest) = rest.strip_prefix('/') else {
        return normalized;
    };
    match rest.split_once('/') {
        Some((_platform, remainder)) => remainder.to_string(),
        None => rest.to_string(),
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Size and modification time of a file, used in fingerprints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub len: u64,
    pub modified_nanos: u128,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} '{}' failed: {message}", .path.display())]
pub struct FsError {
    pub operation: &'static str,
    pub path: PathBuf,
    pub message: String,
}

impl FsError {
    pub fn new(operation: &'static str, path: &Path, message: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    fn io(operation: &'static str, path: &Path, error: std::io::Error) -> Self {
        Self::new(operation, path, error.to_string())
    }
}

/// Filesystem collaborator. Every filesystem effect of an operation goes
/// through this trait.
#[async_trait]
pub trait AssetFileSystem: Send + Sync {
    async fn is_dir(&self, path: &Path) -> bool;

    async fn is_file(&self, path: &Path) -> bool;

    async fn stamp(&self, path: &Path) -> Result<Option<FileStamp>, FsError>;

    /// Every file below `root`, recursively, sorted by path.
    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, FsError>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

    async fn copy(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    async fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// Writes only when the file is missing or its contents differ.
    /// Returns whether a write happened.
    async fn write_if_changed(&self, path: &Path, contents: &[u8]) -> Result<bool, FsError> {
        if self.is_file(path).await && self.read(path).await? == contents {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            if !self.is_dir(parent).await {
                self.create_dir_all(parent).await?;
            }
        }
        self.write(path, contents).await?;
        Ok(true)
    }
}

pub type SharedAssetFileSystem = Arc<dyn AssetFileSystem>;

#[derive(Clone, Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AssetFileSystem for LocalFileSystem {
    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    async fn stamp(&self, path: &Path) -> Result<Option<FileStamp>, FsError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(FsError::io("stat", path, error)),
        };
        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        Ok(Some(FileStamp {
            len: metadata.len(),
            modified_nanos,
        }))
    }

    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, FsError> {
        let root = root.to_path_buf();
        let walk_root = root.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in walkdir::WalkDir::new(&walk_root).follow_links(false) {
                let entry = entry.map_err(|error| {
                    FsError::new("list", error.path().unwrap_or(walk_root.as_path()), error.to_string())
                })?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok::<_, FsError>(files)
        })
        .await
        .map_err(|error| FsError::new("list", &root, error.to_string()))?
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        tokio::fs::read(path)
            .await
            .map_err(|error| FsError::io("read", path, error))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|error| FsError::io("create directory", path, error))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|error| FsError::io("write", path, error))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|error| FsError::io("copy", from, error))
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|error| FsError::io("remove", path, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(flavor = "current_thread")]
    async fn list_files_nested_expected_sorted_files_only() {
        let temp = TempDir::new().expect("temp dir should create");
        std::fs::create_dir_all(temp.path().join("b/c")).expect("dirs should create");
        std::fs::write(temp.path().join("b/c/z.png"), b"z").expect("write should succeed");
        std::fs::write(temp.path().join("a.png"), b"a").expect("write should succeed");

        let files = LocalFileSystem::new()
            .list_files(temp.path())
            .await
            .expect("listing should succeed");

        assert_eq!(
            files,
            vec![temp.path().join("a.png"), temp.path().join("b/c/z.png")]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn write_if_changed_same_contents_expected_no_write() {
        let temp = TempDir::new().expect("temp dir should create");
        let path = temp.path().join("nested/out.bin");
        let fs = LocalFileSystem::new();

        assert!(fs.write_if_changed(&path, b"one").await.expect("first write"));
        assert!(!fs.write_if_changed(&path, b"one").await.expect("second write"));
        assert!(fs.write_if_changed(&path, b"two").await.expect("third write"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stamp_missing_file_expected_none() {
        let temp = TempDir::new().expect("temp dir should create");
        let stamp = LocalFileSystem::new()
            .stamp(&temp.path().join("missing"))
            .await
            .expect("stamp should not error");
        assert_eq!(stamp, None);
    }
}

use crate::filesystem::{AssetFileSystem, FileStamp, FsError, LocalFileSystem, SharedAssetFileSystem};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub writes: usize,
    pub copies: usize,
    pub removals: usize,
    pub directories_created: usize,
}

impl MutationCounts {
    pub fn total(&self) -> usize {
        self.writes + self.copies + self.removals + self.directories_created
    }
}

#[derive(Debug, Default)]
struct CountingState {
    counts: MutationCounts,
    mutated_paths: Vec<PathBuf>,
}

/// Filesystem wrapper that records every mutating call before delegating.
#[derive(Clone)]
pub struct CountingFileSystem {
    inner: SharedAssetFileSystem,
    state: Arc<Mutex<CountingState>>,
}

impl Default for CountingFileSystem {
    fn default() -> Self {
        Self::wrap(Arc::new(LocalFileSystem::new()))
    }
}

impl CountingFileSystem {
    pub fn wrap(inner: SharedAssetFileSystem) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(CountingState::default())),
        }
    }

    pub fn counts(&self) -> MutationCounts {
        self.state
            .lock()
            .map(|state| state.counts.clone())
            .unwrap_or_default()
    }

    pub fn mutated_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .map(|state| state.mutated_paths.clone())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = CountingState::default();
        }
    }

    fn record(&self, path: &Path, bump: impl FnOnce(&mut MutationCounts)) {
        if let Ok(mut state) = self.state.lock() {
            bump(&mut state.counts);
            state.mutated_paths.push(path.to_path_buf());
        }
    }
}

#[async_trait]
impl AssetFileSystem for CountingFileSystem {
    async fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path).await
    }

    async fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path).await
    }

    async fn stamp(&self, path: &Path) -> Result<Option<FileStamp>, FsError> {
        self.inner.stamp(path).await
    }

    async fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, FsError> {
        self.inner.list_files(root).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.inner.read(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.record(path, |counts| counts.directories_created += 1);
        self.inner.create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        self.record(path, |counts| counts.writes += 1);
        self.inner.write(path, contents).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        self.record(to, |counts| counts.copies += 1);
        self.inner.copy(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.record(path, |counts| counts.removals += 1);
        self.inner.remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(flavor = "current_thread")]
    async fn counting_fs_mutations_expected_counted_and_reset() {
        let temp = TempDir::new().expect("temp dir should create");
        let fs = CountingFileSystem::default();
        let path = temp.path().join("a/b.txt");

        fs.write_if_changed(&path, b"x").await.expect("write should succeed");
        fs.write_if_changed(&path, b"x").await.expect("rewrite should succeed");

        assert_eq!(
            fs.counts(),
            MutationCounts {
                writes: 1,
                copies: 0,
                removals: 0,
                directories_created: 1,
            }
        );
        fs.reset();
        assert_eq!(fs.counts().total(), 0);
    }
}

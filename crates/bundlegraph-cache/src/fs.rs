use crate::memory::{MemoryCacheStore, MemoryState};
use crate::store::{CacheStore, CacheStoreError, CacheStoreResult};
use crate::types::{CacheEntry, CacheKey, StoreEntryRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const STATE_FILE_NAME: &str = "fingerprints.json";

/// Memory store mirrored to a JSON state file after every mutation, so
/// fingerprints survive process restarts.
///
/// Clones share one state and one persist lock: the snapshot, the write of
/// the temp file and the rename happen as a single step.
#[derive(Clone, Debug)]
pub struct FsCacheStore {
    state_file: PathBuf,
    inner: MemoryCacheStore,
    persist_lock: Arc<Mutex<()>>,
}

impl FsCacheStore {
    pub fn new<P: AsRef<Path>>(root: P) -> CacheStoreResult<Self> {
        fs::create_dir_all(root.as_ref()).map_err(|err| {
            CacheStoreError::Backend(format!("create cache store root failed: {err}"))
        })?;
        let state_file = root.as_ref().join(STATE_FILE_NAME);
        let state = if state_file.exists() {
            let raw = fs::read(&state_file)
                .map_err(|err| CacheStoreError::Backend(format!("read state file failed: {err}")))?;
            serde_json::from_slice::<MemoryState>(&raw)
                .map_err(|err| CacheStoreError::Serialization(err.to_string()))?
        } else {
            MemoryState::default()
        };

        Ok(Self {
            state_file,
            inner: MemoryCacheStore::from_state(state),
            persist_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn persist(&self) -> CacheStoreResult<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| CacheStoreError::Backend("persist lock poisoned".to_string()))?;
        let snapshot = self.inner.snapshot()?;
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| CacheStoreError::Serialization(err.to_string()))?;
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| CacheStoreError::Backend(format!("write state file failed: {err}")))?;
        fs::rename(&tmp, &self.state_file)
            .map_err(|err| CacheStoreError::Backend(format!("rename state file failed: {err}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for FsCacheStore {
    async fn load(&self, key: &CacheKey) -> CacheStoreResult<Option<CacheEntry>> {
        self.inner.load(key).await
    }

    async fn store(&self, request: StoreEntryRequest) -> CacheStoreResult<CacheEntry> {
        let entry = self.inner.store(request).await?;
        self.persist()?;
        Ok(entry)
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheStoreResult<bool> {
        let removed = self.inner.invalidate(key).await?;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    async fn invalidate_target(&self, target: &str) -> CacheStoreResult<usize> {
        let removed = self.inner.invalidate_target(target).await?;
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    async fn list_keys(&self) -> CacheStoreResult<Vec<CacheKey>> {
        self.inner.list_keys().await
    }
}

use crate::store::{CacheStore, CacheStoreError, CacheStoreResult};
use crate::types::{CacheEntry, CacheKey, StoreEntryRequest, content_hash};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct MemoryState {
    pub next_revision: u64,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl MemoryState {
    fn allocate_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCacheStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: MemoryState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStoreResult<MemoryState> {
        let state = self.lock()?;
        Ok(state.clone())
    }

    fn lock(&self) -> CacheStoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| CacheStoreError::Backend("memory cache store mutex poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &CacheKey) -> CacheStoreResult<Option<CacheEntry>> {
        let state = self.lock()?;
        Ok(state.entries.get(&key.encoded()).cloned())
    }

    async fn store(&self, request: StoreEntryRequest) -> CacheStoreResult<CacheEntry> {
        if request.key.node_id.is_empty() {
            return Err(CacheStoreError::InvalidInput(
                "cache key node id cannot be empty".to_string(),
            ));
        }

        let mut state = self.lock()?;
        let revision = state.allocate_revision();
        let entry = CacheEntry {
            payload_hash: content_hash(&request.payload),
            key: request.key,
            fingerprint: request.fingerprint,
            payload: request.payload,
            revision,
        };
        state.entries.insert(entry.key.encoded(), entry.clone());
        Ok(entry)
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheStoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state.entries.remove(&key.encoded()).is_some())
    }

    async fn invalidate_target(&self, target: &str) -> CacheStoreResult<usize> {
        let mut state = self.lock()?;
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.key.target != target);
        Ok(before - state.entries.len())
    }

    async fn list_keys(&self) -> CacheStoreResult<Vec<CacheKey>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .values()
            .map(|entry| entry.key.clone())
            .collect())
    }
}

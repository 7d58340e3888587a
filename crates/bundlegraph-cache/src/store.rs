use crate::types::{CacheEntry, CacheKey, StoreEntryRequest};

#[derive(Debug, thiserror::Error)]
pub enum CacheStoreError {
    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type CacheStoreResult<T> = Result<T, CacheStoreError>;

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> CacheStoreResult<Option<CacheEntry>>;

    /// Replaces any previous entry for the key and bumps its revision.
    async fn store(&self, request: StoreEntryRequest) -> CacheStoreResult<CacheEntry>;

    async fn invalidate(&self, key: &CacheKey) -> CacheStoreResult<bool>;

    /// Drops every entry of one target group; returns how many were removed.
    async fn invalidate_target(&self, target: &str) -> CacheStoreResult<usize>;

    async fn list_keys(&self) -> CacheStoreResult<Vec<CacheKey>>;
}

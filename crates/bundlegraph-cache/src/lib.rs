//! Cache stores backing incremental graph execution.
//!
//! An entry remembers, per `(target group, node id)`, the fingerprint of the
//! inputs a node last ran against and the serialized outputs it produced.

pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;
pub use store::{CacheStore, CacheStoreError, CacheStoreResult};
pub use types::{CacheEntry, CacheKey, ContentHash, Fingerprinter, StoreEntryRequest, content_hash};

//! Per-target output cache consulted during Run.

use crate::asset::{AssetGroups, PointOutputs};
use crate::filesystem::AssetFileSystem;
use crate::{BuildTargetGroup, BundleGraphError, NodeSpec};
use bundlegraph_cache::{CacheKey, CacheStore, ContentHash, Fingerprinter, StoreEntryRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub type SharedCacheStore = Arc<dyn CacheStore>;

const FINGERPRINT_DOMAIN: &str = "bundlegraph-fingerprint:v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedNode {
    pub fingerprint: ContentHash,
    pub outputs: PointOutputs,
}

pub struct ExecutionCache {
    store: SharedCacheStore,
    target: BuildTargetGroup,
    entries: BTreeMap<String, CachedNode>,
    pending: BTreeMap<String, CachedNode>,
    invalidated: BTreeSet<String>,
}

impl ExecutionCache {
    /// Loads the stored entries of `node_ids` for one target group.
    /// Unreadable payloads are treated as misses.
    pub async fn load(
        store: SharedCacheStore,
        target: BuildTargetGroup,
        node_ids: &[String],
    ) -> Result<Self, BundleGraphError> {
        let mut entries = BTreeMap::new();
        for node_id in node_ids {
            let key = CacheKey::new(target.as_str(), node_id.clone());
            let Some(entry) = store.load(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<PointOutputs>(&entry.payload) {
                Ok(outputs) => {
                    entries.insert(
                        node_id.clone(),
                        CachedNode {
                            fingerprint: entry.fingerprint,
                            outputs,
                        },
                    );
                }
                Err(error) => {
                    debug!(node_id = %node_id, %error, "discarding unreadable cache entry");
                }
            }
        }
        Ok(Self {
            store,
            target,
            entries,
            pending: BTreeMap::new(),
            invalidated: BTreeSet::new(),
        })
    }

    pub fn target(&self) -> BuildTargetGroup {
        self.target
    }

    pub fn previous_outputs(&self, node_id: &str) -> Option<&PointOutputs> {
        self.entries.get(node_id).map(|entry| &entry.outputs)
    }

    /// Outputs recorded for `fingerprint`, provided every file they reference
    /// still exists.
    pub async fn lookup(
        &self,
        node_id: &str,
        fingerprint: &str,
        fs: &dyn AssetFileSystem,
    ) -> Option<PointOutputs> {
        let entry = self.entries.get(node_id)?;
        if entry.fingerprint != fingerprint {
            return None;
        }
        for asset in entry.outputs.values().flat_map(|groups| groups.values()).flatten() {
            if !fs.is_file(asset.materialized_path()).await {
                debug!(node_id, path = %asset.materialized_path().display(), "cached output missing");
                return None;
            }
        }
        Some(entry.outputs.clone())
    }

    pub fn record(&mut self, node_id: &str, fingerprint: ContentHash, outputs: PointOutputs) {
        let cached = CachedNode {
            fingerprint,
            outputs,
        };
        self.invalidated.remove(node_id);
        self.entries.insert(node_id.to_string(), cached.clone());
        self.pending.insert(node_id.to_string(), cached);
    }

    pub fn invalidate(&mut self, node_id: &str) {
        self.entries.remove(node_id);
        self.pending.remove(node_id);
        self.invalidated.insert(node_id.to_string());
    }

    /// Writes recorded entries and invalidations back to the store.
    pub async fn flush(&mut self) -> Result<usize, BundleGraphError> {
        let mut written = 0;
        for node_id in std::mem::take(&mut self.invalidated) {
            let key = CacheKey::new(self.target.as_str(), node_id);
            self.store.invalidate(&key).await?;
        }
        for (node_id, cached) in std::mem::take(&mut self.pending) {
            let payload = serde_json::to_vec(&cached.outputs).map_err(|error| {
                BundleGraphError::Runtime(format!("cache payload serialization failed: {error}"))
            })?;
            self.store
                .store(StoreEntryRequest {
                    key: CacheKey::new(self.target.as_str(), node_id),
                    fingerprint: cached.fingerprint,
                    payload,
                })
                .await?;
            written += 1;
        }
        Ok(written)
    }
}

/// Fingerprint of a node for one target: its resolved configuration, the
/// identities of its input assets, and the size and mtime of their files.
pub async fn fingerprint(
    target: BuildTargetGroup,
    node: &NodeSpec,
    inputs: &AssetGroups,
    fs: &dyn AssetFileSystem,
) -> Result<ContentHash, BundleGraphError> {
    let config = serde_json::to_vec(&node.config_snapshot(target)).map_err(|error| {
        BundleGraphError::Runtime(format!("node configuration serialization failed: {error}"))
    })?;

    let mut hasher = Fingerprinter::new();
    hasher
        .str_part(FINGERPRINT_DOMAIN)
        .str_part(target.as_str())
        .part(&config);

    for (group_key, assets) in inputs {
        hasher.str_part(group_key);
        for asset in assets {
            let path = asset.materialized_path();
            hasher
                .str_part(&asset.source_absolute_path.to_string_lossy())
                .str_part(asset.imported_relative_path.as_deref().unwrap_or_default())
                .str_part(&path.to_string_lossy())
                .str_part(asset.asset_type.as_str());
            match fs.stamp(path).await? {
                Some(stamp) => {
                    hasher
                        .part(&stamp.len.to_le_bytes())
                        .part(&stamp.modified_nanos.to_le_bytes());
                }
                None => {
                    hasher.str_part("missing");
                }
            }
        }
    }
    Ok(hasher.finish())
}

use serde::{Deserialize, Serialize};

pub type ContentHash = String;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub target: String,
    pub node_id: String,
}

impl CacheKey {
    pub fn new(target: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            node_id: node_id.into(),
        }
    }

    /// Stable string form used as the map key of persisted state.
    pub fn encoded(&self) -> String {
        format!(
            "bundlegraph-cache:v1|{}|{}",
            encode_part(&self.target),
            encode_part(&self.node_id)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntryRequest {
    pub key: CacheKey,
    pub fingerprint: ContentHash,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub fingerprint: ContentHash,
    pub payload: Vec<u8>,
    pub payload_hash: ContentHash,
    pub revision: u64,
}

pub fn content_hash(bytes: &[u8]) -> ContentHash {
    blake3::hash(bytes).to_hex().to_string()
}

/// Incremental blake3 hasher over length-prefixed parts, so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
#[derive(Clone, Debug, Default)]
pub struct Fingerprinter {
    hasher: blake3::Hasher,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn str_part(&mut self, value: &str) -> &mut Self {
        self.part(value.as_bytes())
    }

    pub fn finish(&self) -> ContentHash {
        self.hasher.finalize().to_hex().to_string()
    }
}

fn encode_part(part: &str) -> String {
    format!("{}:{}", part.len(), part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_encoded_same_inputs_expected_stable_output() {
        let key = CacheKey::new("iOS", "node-A");

        assert_eq!(key.encoded(), CacheKey::new("iOS", "node-A").encoded());
        assert_eq!(key.encoded(), "bundlegraph-cache:v1|3:iOS|6:node-A");
    }

    #[test]
    fn fingerprinter_shifted_boundaries_expected_distinct_hashes() {
        let first = Fingerprinter::new().str_part("ab").str_part("c").finish();
        let second = Fingerprinter::new().str_part("a").str_part("bc").finish();

        assert_ne!(first, second);
    }

    #[test]
    fn content_hash_same_bytes_expected_equal() {
        assert_eq!(content_hash(b"bundle"), content_hash(b"bundle"));
        assert_ne!(content_hash(b"bundle"), content_hash(b"bundle2"));
    }
}

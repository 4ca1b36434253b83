//! Node slot abstraction for the partitioned cache.

use crate::entry::CacheEntry;
use crate::file_cache::FileLevelCache;
use crate::keys::CacheKey;
use crate::types::CacheStats;
use xlrag_core::Result;

/// Storage behind one node slot of a [`crate::DistributedCache`].
///
/// Payloads cross this boundary as serialized bytes so that a slot can be
/// backed by a remote client as easily as by an in-process cache.
pub trait CacheNode: Send + Sync {
    /// Fetch the payload stored under `key` on this node.
    fn get_local(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Store a payload on this node.
    fn put_local(&self, key: &CacheKey, payload: &[u8]) -> Result<CacheEntry>;

    /// Remove `key` from this node. Returns whether it was present.
    fn invalidate_local(&self, key: &CacheKey) -> bool;

    /// Counters for this node.
    fn stats(&self) -> CacheStats;
}

impl CacheNode for FileLevelCache {
    fn get_local(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.get_bytes(key)
    }

    fn put_local(&self, key: &CacheKey, payload: &[u8]) -> Result<CacheEntry> {
        self.put_bytes(key, payload)
    }

    fn invalidate_local(&self, key: &CacheKey) -> bool {
        self.invalidate(key)
    }

    fn stats(&self) -> CacheStats {
        FileLevelCache::stats(self)
    }
}

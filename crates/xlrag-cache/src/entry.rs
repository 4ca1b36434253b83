//! Bookkeeping for one stored computation.

use crate::keys::CacheKey;
use crate::types::CompressionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a cached payload.
///
/// The payload bytes themselves stay inside the cache; callers receive a
/// snapshot of this record from `put` and from [`crate::FileLevelCache::entries`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Owning key.
    pub key: CacheKey,
    /// Size of the payload as stored, after compression.
    pub stored_size: u64,
    /// Size of the serialized payload before compression.
    pub original_size: u64,
    /// Codec the stored bytes were written with.
    pub compression: CompressionType,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Incremented on every successful read.
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        stored_size: u64,
        original_size: u64,
        compression: CompressionType,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            stored_size,
            original_size,
            compression,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
        }
    }

    /// Record a successful read.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }

    /// `stored_size / original_size`, `1.0` for empty payloads.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.stored_size as f64 / self.original_size as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FingerprintPolicy;

    fn key() -> CacheKey {
        CacheKey::from_parts(
            "/data/q3.xlsx",
            "f".repeat(32),
            "o".repeat(32),
            FingerprintPolicy::Metadata,
        )
    }

    #[test]
    fn test_new_entry_counts_creation_as_access() {
        let entry = CacheEntry::new(key(), 10, 40, CompressionType::Zstd);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.created_at, entry.last_accessed_at);
        assert_eq!(entry.compression_ratio(), 0.25);
    }

    #[test]
    fn test_touch_advances_access() {
        let mut entry = CacheEntry::new(key(), 0, 0, CompressionType::None);
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count, 3);
        assert!(entry.last_accessed_at >= entry.created_at);
        assert_eq!(entry.compression_ratio(), 1.0);
    }
}

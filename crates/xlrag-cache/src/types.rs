//! Cache types and statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xlrag_core::NodeId;

/// Compression algorithm applied to stored payloads.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Zstd,
    Gzip,
    Lz4,
}

/// How a source file's fingerprint is derived.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintPolicy {
    /// Canonical path, size and modification time. Constant cost, but two
    /// writes of the same size within the filesystem's timestamp
    /// resolution are indistinguishable.
    #[default]
    Metadata,
    /// SHA-256 of the file contents. Reads the whole file on every check.
    Content,
}

/// Cumulative counters for one cache instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub bytes_used: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub corruptions: u64,
    pub max_entries: usize,
    pub max_memory_bytes: u64,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or `0.0` before the first request.
    pub fn ratio(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Counters for a [`crate::DistributedCache`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributedStats {
    pub primary_hits: u64,
    pub replica_hits: u64,
    pub misses: u64,
    pub read_repairs: u64,
    pub corruptions: u64,
    pub replication_success_count: u64,
    pub replication_failure_count: u64,
    pub nodes: BTreeMap<NodeId, CacheStats>,
}

/// Where a key lives in a node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_without_requests() {
        assert_eq!(CacheStats::ratio(0, 0), 0.0);
    }

    #[test]
    fn test_ratio() {
        assert_eq!(CacheStats::ratio(3, 1), 0.75);
    }

    #[test]
    fn test_policy_serde_names() {
        let yaml = serde_yaml::to_string(&FingerprintPolicy::Content).unwrap();
        assert_eq!(yaml.trim(), "content");
        let parsed: CompressionType = serde_yaml::from_str("lz4").unwrap();
        assert_eq!(parsed, CompressionType::Lz4);
    }
}

//! Cache configuration.

use crate::types::{CompressionType, FingerprintPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xlrag_core::{Error, NodeId, Result};

/// Configuration for a single [`crate::FileLevelCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Memory budget for stored payload bytes.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,
    /// Fraction of `max_memory_bytes` above which a cleanup pass runs.
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: f64,
    /// Share of entries a cleanup pass evicts at minimum.
    #[serde(default = "default_cleanup_fraction")]
    pub cleanup_fraction: f64,
    /// Codec for stored payloads.
    #[serde(default)]
    pub compression: CompressionType,
    /// Payloads smaller than this are stored uncompressed.
    #[serde(default = "default_compression_min_bytes")]
    pub compression_min_bytes: usize,
    /// How source files are fingerprinted.
    #[serde(default)]
    pub fingerprint: FingerprintPolicy,
    /// Directory for the on-disk tier. Disabled when unset.
    #[serde(default)]
    pub persist_dir: Option<PathBuf>,
}

fn default_max_entries() -> usize {
    1000
}

fn default_max_memory_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_cleanup_threshold() -> f64 {
    0.8
}

fn default_cleanup_fraction() -> f64 {
    0.25
}

fn default_compression_min_bytes() -> usize {
    512
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_bytes: default_max_memory_bytes(),
            cleanup_threshold: default_cleanup_threshold(),
            cleanup_fraction: default_cleanup_fraction(),
            compression: CompressionType::default(),
            compression_min_bytes: default_compression_min_bytes(),
            fingerprint: FingerprintPolicy::default(),
            persist_dir: None,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config("max_entries must be greater than 0".into()));
        }
        if self.max_memory_bytes == 0 {
            return Err(Error::Config(
                "max_memory_bytes must be greater than 0".into(),
            ));
        }
        check_fraction("cleanup_threshold", self.cleanup_threshold)?;
        check_fraction("cleanup_fraction", self.cleanup_fraction)?;
        Ok(())
    }

    /// Byte count above which a cleanup pass is triggered.
    pub fn cleanup_trigger_bytes(&self) -> u64 {
        (self.max_memory_bytes as f64 * self.cleanup_threshold) as u64
    }
}

/// Configuration for a [`crate::DistributedCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Number of node slots. Fixed for the lifetime of the cache.
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    /// Replicas kept in addition to the primary.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
    /// Settings applied to every node slot.
    #[serde(default)]
    pub node: CacheConfig,
}

fn default_node_count() -> u32 {
    3
}

fn default_replication_factor() -> usize {
    2
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            replication_factor: default_replication_factor(),
            node: CacheConfig::default(),
        }
    }
}

impl DistributedConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(Error::Config("node_count must be greater than 0".into()));
        }
        self.node.validate()
    }

    /// Per-slot configuration; persisted slots get their own subdirectory.
    pub fn node_config(&self, node: NodeId) -> CacheConfig {
        let mut config = self.node.clone();
        config.persist_dir = self
            .node
            .persist_dir
            .as_ref()
            .map(|dir| dir.join(node.to_string()));
        config
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}

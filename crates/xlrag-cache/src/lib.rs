//! Caching for spreadsheet conversion results.
//!
//! Results are keyed by a fingerprint of the source workbook plus a
//! fingerprint of the processing options. [`FileLevelCache`] is a bounded
//! single-process cache with optional compression and an optional on-disk
//! tier; [`DistributedCache`] partitions keys over a table of node slots
//! and keeps best-effort replicas.

pub mod compression;
pub mod config;
pub mod distributed;
pub mod entry;
pub mod file_cache;
pub mod keys;
pub mod node;
pub mod store;
pub mod types;

pub use compression::{compress, decompress};
pub use config::{CacheConfig, DistributedConfig};
pub use distributed::DistributedCache;
pub use entry::CacheEntry;
pub use file_cache::FileLevelCache;
pub use keys::{CacheKey, file_fingerprint, make_key, make_key_with, options_fingerprint, sanitize_key};
pub use node::CacheNode;
pub use store::{DiskStore, Listing, PersistedEntry, PersistedHeader, PurgeReport};
pub use types::{CacheStats, CompressionType, DistributedStats, FingerprintPolicy, Placement};

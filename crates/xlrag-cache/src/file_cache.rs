//! Single-process cache for conversion results keyed by source file.
//!
//! Entries live in an LRU list behind one mutex. Every lookup re-checks the
//! source file's fingerprint, so a workbook that changed on disk reads as a
//! miss and its entry is dropped on the spot. Decoding problems are treated
//! the same way: the entry is evicted and the caller recomputes.
//!
//! When a disk tier is configured it mirrors the in-memory entries: writes,
//! evictions and invalidations touch both tiers under the same lock, so the
//! two never disagree about a payload.

use crate::compression::{self, decompress};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::keys::{CacheKey, make_key_with};
use crate::store::DiskStore;
use crate::types::{CacheStats, CompressionType};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, info, warn};
use xlrag_core::Result;

struct StoredEntry {
    meta: CacheEntry,
    data: Vec<u8>,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
    corruptions: u64,
}

struct Inner {
    entries: LruCache<String, StoredEntry>,
    bytes_used: u64,
    counters: Counters,
}

impl Inner {
    fn remove(&mut self, identity: &str) -> bool {
        match self.entries.pop(identity) {
            Some(stored) => {
                self.bytes_used -= stored.meta.stored_size;
                true
            }
            None => false,
        }
    }
}

/// Bounded, file-aware cache.
pub struct FileLevelCache {
    config: CacheConfig,
    store: Option<DiskStore>,
    inner: Mutex<Inner>,
}

impl FileLevelCache {
    /// Create a cache from a validated configuration.
    ///
    /// An existing disk tier is trimmed to `max_entries`, newest first.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store = config.persist_dir.clone().map(DiskStore::new);
        if let Some(store) = &store {
            match store.trim(config.max_entries) {
                Ok(0) => {}
                Ok(removed) => info!(removed, dir = %store.root().display(), "Disk tier trimmed"),
                Err(e) => warn!(dir = %store.root().display(), error = %e, "Failed to trim disk tier"),
            }
        }
        Ok(Self {
            config,
            store,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes_used: 0,
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Generate a key using this cache's fingerprint policy.
    pub fn make_key<O: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        options: &O,
    ) -> Result<CacheKey> {
        make_key_with(path, options, self.config.fingerprint)
    }

    /// Store a serializable payload.
    pub fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, payload: &T) -> Result<CacheEntry> {
        let bytes = serde_json::to_vec(payload)?;
        self.put_bytes(key, &bytes)
    }

    /// Fetch and decode a payload. `None` on a miss, a stale source file,
    /// or an entry that no longer decodes as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key, |bytes| {
            serde_json::from_slice(&bytes).map_err(|e| e.to_string())
        })
    }

    /// Store already serialized payload bytes, replacing any entry with
    /// the same identity.
    pub fn put_bytes(&self, key: &CacheKey, payload: &[u8]) -> Result<CacheEntry> {
        let (data, used) = compression::encode(
            payload,
            self.config.compression,
            self.config.compression_min_bytes,
        )?;
        let entry = CacheEntry::new(
            key.clone(),
            data.len() as u64,
            payload.len() as u64,
            used,
        );

        let mut inner = self.inner.lock();
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&entry, &data) {
                warn!(identity = %key, error = %e, "Failed to persist cache entry");
            }
        }
        self.insert_locked(&mut inner, entry.clone(), data);
        debug!(
            identity = %key,
            stored_size = entry.stored_size,
            ratio = entry.compression_ratio(),
            "Entry stored"
        );
        Ok(entry)
    }

    /// Fetch the serialized payload bytes.
    pub fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.lookup(key, Ok)
    }

    /// Whether an entry exists in memory, without checking freshness or
    /// touching the LRU order.
    ///
    /// Only the memory tier is consulted: an entry that survives only on
    /// disk (after a restart) reports `false` although `get` would promote it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key.identity())
    }

    /// Remove an entry from memory and disk. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove(key.identity());
        let removed_on_disk = self.remove_persisted(key.identity());
        if removed || removed_on_disk {
            inner.counters.invalidations += 1;
        }
        removed || removed_on_disk
    }

    /// Drop every entry, in memory and on disk. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for (identity, _) in inner.entries.iter() {
            self.remove_persisted(identity);
        }
        inner.entries.clear();
        inner.bytes_used = 0;
    }

    /// Re-check every entry's source file and drop the stale ones.
    pub fn purge_stale(&self) -> usize {
        let keys: Vec<CacheKey> = {
            let inner = self.inner.lock();
            inner.entries.iter().map(|(_, s)| s.meta.key.clone()).collect()
        };
        let stale: Vec<CacheKey> = keys.into_iter().filter(|k| !k.is_fresh()).collect();

        let mut purged = 0;
        for key in &stale {
            let mut inner = self.inner.lock();
            if inner.remove(key.identity()) {
                inner.counters.invalidations += 1;
                purged += 1;
            }
            self.remove_persisted(key.identity());
        }
        if purged > 0 {
            info!(purged, "Stale entries purged");
        }
        purged
    }

    /// Metadata for every in-memory entry, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let inner = self.inner.lock();
        inner.entries.iter().rev().map(|(_, s)| s.meta.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters since construction.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let c = &inner.counters;
        CacheStats {
            entries: inner.entries.len(),
            hits: c.hits,
            misses: c.misses,
            hit_ratio: CacheStats::ratio(c.hits, c.misses),
            bytes_used: inner.bytes_used,
            evictions: c.evictions,
            invalidations: c.invalidations,
            corruptions: c.corruptions,
            max_entries: self.config.max_entries,
            max_memory_bytes: self.config.max_memory_bytes,
        }
    }

    fn lookup<T>(
        &self,
        key: &CacheKey,
        decode: impl Fn(Vec<u8>) -> std::result::Result<T, String>,
    ) -> Option<T> {
        let identity = key.identity();
        let fresh = key.is_fresh();

        let mut inner = self.inner.lock();
        if !fresh {
            if inner.remove(identity) {
                inner.counters.invalidations += 1;
                debug!(identity = %identity, path = %key.file_path.display(), "Source changed, entry invalidated");
            }
            self.remove_persisted(identity);
            inner.counters.misses += 1;
            return None;
        }

        let outcome = inner.entries.get_mut(identity).map(|stored| {
            decode_stored(&stored.data, stored.meta.compression)
                .and_then(&decode)
                .map(|value| {
                    stored.meta.touch();
                    (value, stored.meta.access_count)
                })
        });
        match outcome {
            Some(Ok((value, access_count))) => {
                inner.counters.hits += 1;
                debug!(identity = %identity, access_count, "Cache hit");
                return Some(value);
            }
            Some(Err(e)) => {
                warn!(identity = %identity, error = %e, "Corrupt cache entry evicted");
                inner.remove(identity);
                self.remove_persisted(identity);
                inner.counters.corruptions += 1;
                inner.counters.misses += 1;
                return None;
            }
            None => {}
        }

        if let Some(value) = self.load_persisted_locked(&mut inner, key, &decode) {
            return Some(value);
        }

        inner.counters.misses += 1;
        debug!(identity = %identity, "Cache miss");
        None
    }

    /// Disk-tier fallback for an identity absent from memory. Promotes a
    /// valid entry into memory.
    fn load_persisted_locked<T>(
        &self,
        inner: &mut Inner,
        key: &CacheKey,
        decode: &impl Fn(Vec<u8>) -> std::result::Result<T, String>,
    ) -> Option<T> {
        let store = self.store.as_ref()?;
        let identity = key.identity();

        let persisted = match store.load(identity) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return None,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Corrupt persisted entry removed");
                inner.counters.corruptions += 1;
                self.remove_persisted(identity);
                return None;
            }
        };
        if persisted.header.file_fingerprint != key.file_fingerprint {
            self.remove_persisted(identity);
            inner.counters.invalidations += 1;
            return None;
        }

        match decode_stored(&persisted.data, persisted.header.compression).and_then(decode) {
            Ok(value) => {
                let mut entry = persisted.to_entry();
                entry.touch();
                self.insert_locked(inner, entry, persisted.data);
                inner.counters.hits += 1;
                debug!(identity = %identity, "Entry promoted from disk");
                Some(value)
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Corrupt persisted entry removed");
                inner.counters.corruptions += 1;
                self.remove_persisted(identity);
                None
            }
        }
    }

    fn insert_locked(&self, inner: &mut Inner, entry: CacheEntry, data: Vec<u8>) {
        let identity = entry.key.identity().to_string();
        inner.remove(&identity);

        while inner.entries.len() >= self.config.max_entries {
            if !self.evict_lru_locked(inner) {
                break;
            }
        }

        inner.bytes_used += entry.stored_size;
        inner.entries.put(identity, StoredEntry { meta: entry, data });

        if inner.bytes_used > self.config.cleanup_trigger_bytes() {
            self.cleanup_locked(inner);
        }
    }

    /// Drop the least recently used entry from both tiers.
    fn evict_lru_locked(&self, inner: &mut Inner) -> bool {
        let Some((identity, stored)) = inner.entries.pop_lru() else {
            return false;
        };
        inner.bytes_used -= stored.meta.stored_size;
        inner.counters.evictions += 1;
        self.remove_persisted(&identity);
        debug!(identity = %identity, size = stored.meta.stored_size, "Entry evicted");
        true
    }

    /// Evict from the LRU end until at least `cleanup_fraction` of the
    /// entries are gone and usage is back under the trigger. The most
    /// recently inserted entry always survives.
    fn cleanup_locked(&self, inner: &mut Inner) {
        let before = inner.entries.len();
        let bytes_before = inner.bytes_used;
        let target = ((before as f64 * self.config.cleanup_fraction).ceil() as usize).max(1);
        let trigger = self.config.cleanup_trigger_bytes();

        let mut removed = 0;
        while inner.entries.len() > 1 && (removed < target || inner.bytes_used > trigger) {
            if !self.evict_lru_locked(inner) {
                break;
            }
            removed += 1;
        }

        info!(
            removed,
            bytes_before,
            bytes_after = inner.bytes_used,
            "Memory cleanup pass completed"
        );
        if inner.bytes_used > trigger {
            warn!(
                bytes_used = inner.bytes_used,
                trigger, "Single entry exceeds the memory cleanup threshold"
            );
        }
    }

    fn remove_persisted(&self, identity: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.remove(identity) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to remove persisted entry");
                false
            }
        }
    }
}

fn decode_stored(data: &[u8], compression: CompressionType) -> std::result::Result<Vec<u8>, String> {
    decompress(data, compression).map_err(|e| e.to_string())
}

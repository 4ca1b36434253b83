//! Partitioned cache over a fixed table of node slots.
//!
//! Placement is a pure function of the key identity and the node count:
//! the primary is `hash(identity) % nodes`, replicas are the next nodes
//! around the ring. Writes to the primary must succeed; replica writes are
//! best effort and only show up in the statistics.

use crate::config::DistributedConfig;
use crate::entry::CacheEntry;
use crate::file_cache::FileLevelCache;
use crate::keys::CacheKey;
use crate::node::CacheNode;
use crate::types::{DistributedStats, Placement};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use xlrag_core::{Error, NodeId, Result};

#[derive(Default)]
struct Counters {
    primary_hits: AtomicU64,
    replica_hits: AtomicU64,
    misses: AtomicU64,
    read_repairs: AtomicU64,
    corruptions: AtomicU64,
    replication_success: AtomicU64,
    replication_failure: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Cache partitioned across node slots with replica bookkeeping.
pub struct DistributedCache<N: CacheNode = FileLevelCache> {
    nodes: Vec<N>,
    replication_factor: usize,
    failed: RwLock<BTreeSet<NodeId>>,
    counters: Counters,
}

impl DistributedCache<FileLevelCache> {
    /// Build a node table of in-process caches.
    pub fn new(config: DistributedConfig) -> Result<Self> {
        config.validate()?;
        let nodes = (0..config.node_count)
            .map(|i| FileLevelCache::new(config.node_config(NodeId::new(i))))
            .collect::<Result<Vec<_>>>()?;
        Self::with_nodes(nodes, config.replication_factor)
    }
}

impl<N: CacheNode> DistributedCache<N> {
    /// Build over caller-supplied node slots. Node ids follow vector order.
    ///
    /// The replication factor is clamped to the number of other nodes.
    pub fn with_nodes(nodes: Vec<N>, replication_factor: usize) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Config("node table must not be empty".into()));
        }
        if nodes.len() > u32::MAX as usize {
            return Err(Error::Config("too many nodes".into()));
        }
        let replication_factor = replication_factor.min(nodes.len() - 1);
        info!(
            nodes = nodes.len(),
            replication_factor, "Distributed cache initialized"
        );
        Ok(Self {
            nodes,
            replication_factor,
            failed: RwLock::new(BTreeSet::new()),
            counters: Counters::default(),
        })
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32).map(NodeId::new).collect()
    }

    /// The slot behind `id`, if it exists.
    pub fn node(&self, id: NodeId) -> Option<&N> {
        self.nodes.get(id.index())
    }

    /// Owner of `identity`. Stable for a fixed node count.
    pub fn primary_node(&self, identity: &str) -> NodeId {
        let digest = Sha256::digest(identity.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let slot = u64::from_be_bytes(prefix) % self.nodes.len() as u64;
        NodeId::new(slot as u32)
    }

    /// The next `count` distinct nodes after the primary, wrapping around.
    pub fn replica_nodes(&self, identity: &str, count: usize) -> Vec<NodeId> {
        let n = self.nodes.len();
        let primary = self.primary_node(identity).index();
        (1..=count.min(n - 1))
            .map(|offset| NodeId::new(((primary + offset) % n) as u32))
            .collect()
    }

    pub fn placement(&self, identity: &str) -> Placement {
        Placement {
            primary: self.primary_node(identity),
            replicas: self.replica_nodes(identity, self.replication_factor),
        }
    }

    /// Store a serializable payload on the primary and its replicas.
    pub fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, payload: &T) -> Result<CacheEntry> {
        let bytes = serde_json::to_vec(payload)?;
        self.put_bytes(key, &bytes)
    }

    /// Write to the primary, then best-effort to each replica in ascending
    /// node order. Only a primary failure is returned to the caller.
    pub fn put_bytes(&self, key: &CacheKey, payload: &[u8]) -> Result<CacheEntry> {
        let placement = self.placement(key.identity());
        if !self.is_alive(placement.primary) {
            return Err(Error::NodeUnavailable(placement.primary));
        }
        let entry = self.nodes[placement.primary.index()].put_local(key, payload)?;

        let mut replicas = placement.replicas;
        replicas.sort();
        for replica in replicas {
            if !self.is_alive(replica) {
                bump(&self.counters.replication_failure);
                debug!(identity = %key, node = %replica, "Replica down, write skipped");
                continue;
            }
            match self.nodes[replica.index()].put_local(key, payload) {
                Ok(_) => bump(&self.counters.replication_success),
                Err(e) => {
                    bump(&self.counters.replication_failure);
                    warn!(identity = %key, node = %replica, error = %e, "Replica write failed");
                }
            }
        }
        Ok(entry)
    }

    /// Fetch and decode a payload from the first live node holding one that
    /// decodes as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key, |bytes| {
            serde_json::from_slice(bytes).map_err(|e| e.to_string())
        })
    }

    /// Try the primary, then replicas in ring order. A replica hit is copied
    /// back to a live primary.
    pub fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.lookup(key, |bytes| Ok(bytes.to_vec()))
    }

    /// A copy that fails `decode` is dropped from its node and the next
    /// candidate is tried.
    fn lookup<T>(
        &self,
        key: &CacheKey,
        decode: impl Fn(&[u8]) -> std::result::Result<T, String>,
    ) -> Option<T> {
        let placement = self.placement(key.identity());
        let primary_alive = self.is_alive(placement.primary);

        let candidates = std::iter::once(placement.primary)
            .filter(|_| primary_alive)
            .chain(placement.replicas.iter().copied().filter(|id| self.is_alive(*id)));

        for id in candidates {
            let node = &self.nodes[id.index()];
            let Some(bytes) = node.get_local(key) else {
                continue;
            };
            let value = match decode(&bytes) {
                Ok(value) => value,
                Err(e) => {
                    warn!(identity = %key, node = %id, error = %e, "Undecodable copy evicted");
                    node.invalidate_local(key);
                    bump(&self.counters.corruptions);
                    continue;
                }
            };

            if id == placement.primary {
                bump(&self.counters.primary_hits);
                return Some(value);
            }
            bump(&self.counters.replica_hits);
            debug!(identity = %key, node = %id, "Replica hit");

            if primary_alive {
                match self.nodes[placement.primary.index()].put_local(key, &bytes) {
                    Ok(_) => bump(&self.counters.read_repairs),
                    Err(e) => {
                        warn!(identity = %key, node = %placement.primary, error = %e, "Read repair failed");
                    }
                }
            }
            return Some(value);
        }

        bump(&self.counters.misses);
        None
    }

    /// Remove `key` from every live node. Returns how many held it.
    pub fn invalidate(&self, key: &CacheKey) -> usize {
        self.node_ids()
            .into_iter()
            .filter(|id| self.is_alive(*id))
            .filter(|id| self.nodes[id.index()].invalidate_local(key))
            .count()
    }

    /// Liveness of every node slot.
    pub fn node_health(&self) -> BTreeMap<NodeId, bool> {
        let failed = self.failed.read();
        self.node_ids()
            .into_iter()
            .map(|id| (id, !failed.contains(&id)))
            .collect()
    }

    /// Mark node slots as down. Unknown ids are ignored.
    pub fn simulate_failure(&self, node_ids: &[NodeId]) {
        let mut failed = self.failed.write();
        for id in node_ids.iter().filter(|id| id.index() < self.nodes.len()) {
            if failed.insert(*id) {
                info!(node = %id, "Node marked failed");
            }
        }
    }

    /// Mark node slots as up again.
    pub fn simulate_recovery(&self, node_ids: &[NodeId]) {
        let mut failed = self.failed.write();
        for id in node_ids {
            if failed.remove(id) {
                info!(node = %id, "Node recovered");
            }
        }
    }

    pub fn stats(&self) -> DistributedStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DistributedStats {
            primary_hits: load(&self.counters.primary_hits),
            replica_hits: load(&self.counters.replica_hits),
            misses: load(&self.counters.misses),
            read_repairs: load(&self.counters.read_repairs),
            corruptions: load(&self.counters.corruptions),
            replication_success_count: load(&self.counters.replication_success),
            replication_failure_count: load(&self.counters.replication_failure),
            nodes: self
                .node_ids()
                .into_iter()
                .map(|id| (id, self.nodes[id.index()].stats()))
                .collect(),
        }
    }

    fn is_alive(&self, id: NodeId) -> bool {
        !self.failed.read().contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::keys::make_key;
    use crate::types::CacheStats;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn cluster(nodes: u32, replication_factor: usize) -> DistributedCache {
        DistributedCache::new(DistributedConfig {
            node_count: nodes,
            replication_factor,
            node: CacheConfig::default(),
        })
        .unwrap()
    }

    fn key(dir: &tempfile::TempDir, name: &str) -> CacheKey {
        let path = dir.path().join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        make_key(&path, &json!({"sheet": "Data"})).unwrap()
    }

    #[test]
    fn test_primary_is_stable_and_in_table() {
        let cache = cluster(5, 2);
        for i in 0..50 {
            let identity = format!("identity-{}", i);
            let primary = cache.primary_node(&identity);
            assert_eq!(primary, cache.primary_node(&identity));
            assert!(primary.index() < 5);
        }
    }

    #[test]
    fn test_replicas_follow_primary_cyclically() {
        let cache = cluster(4, 3);
        let identity = "abc";
        let primary = cache.primary_node(identity).index();
        let replicas = cache.replica_nodes(identity, 3);
        let expected: Vec<NodeId> = (1..=3)
            .map(|o| NodeId::new(((primary + o) % 4) as u32))
            .collect();
        assert_eq!(replicas, expected);
        assert!(!replicas.contains(&NodeId::new(primary as u32)));
    }

    #[test]
    fn test_replication_factor_clamped() {
        let cache = cluster(3, 10);
        assert_eq!(cache.replication_factor(), 2);
        assert_eq!(cache.replica_nodes("k", 10).len(), 2);
        assert!(cluster(1, 2).replica_nodes("k", 2).is_empty());
    }

    #[test]
    fn test_put_replicates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &json!({"rows": 12})).unwrap();

        for id in cache.node_ids() {
            assert!(cache.node(id).unwrap().contains(&k), "{} missing key", id);
        }
        assert_eq!(cache.stats().replication_success_count, 2);
        assert_eq!(cache.get::<Value>(&k), Some(json!({"rows": 12})));
        assert_eq!(cache.stats().primary_hits, 1);
    }

    #[test]
    fn test_get_survives_replica_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &"payload").unwrap();

        let placement = cache.placement(k.identity());
        cache.simulate_failure(&placement.replicas[..1]);
        assert_eq!(cache.get::<String>(&k).as_deref(), Some("payload"));
    }

    #[test]
    fn test_primary_failure_rejects_put_but_reads_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &7).unwrap();

        let primary = cache.primary_node(k.identity());
        cache.simulate_failure(&[primary]);
        assert!(matches!(
            cache.put(&k, &8),
            Err(Error::NodeUnavailable(id)) if id == primary
        ));
        assert_eq!(cache.get::<i32>(&k), Some(7));
        let stats = cache.stats();
        assert_eq!(stats.replica_hits, 1);
        assert_eq!(stats.read_repairs, 0);
    }

    #[test]
    fn test_read_repair_populates_primary() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 1);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &"v").unwrap();

        let placement = cache.placement(k.identity());
        let primary = cache.node(placement.primary).unwrap();
        primary.invalidate(&k);
        assert!(!primary.contains(&k));

        assert_eq!(cache.get::<String>(&k).as_deref(), Some("v"));
        assert!(primary.contains(&k));
        assert_eq!(cache.stats().read_repairs, 1);
    }

    #[test]
    fn test_replica_only_key_absent_while_replicas_down() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &"v").unwrap();

        let placement = cache.placement(k.identity());
        cache.node(placement.primary).unwrap().invalidate(&k);
        cache.simulate_failure(&placement.replicas);
        assert_eq!(cache.get::<String>(&k), None);

        let other = key(&dir, "other.xlsx");
        let other_primary = cache.primary_node(other.identity());
        if cache.is_alive(other_primary) {
            cache.put(&other, &"fresh").unwrap();
            assert_eq!(cache.get::<String>(&other).as_deref(), Some("fresh"));
        }

        cache.simulate_recovery(&placement.replicas);
        assert_eq!(cache.get::<String>(&k).as_deref(), Some("v"));
    }

    #[test]
    fn test_writes_to_down_replicas_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        let placement = cache.placement(k.identity());
        cache.simulate_failure(&placement.replicas);

        cache.put(&k, &1).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.replication_failure_count, 2);
        assert_eq!(stats.replication_success_count, 0);
    }

    #[test]
    fn test_node_health() {
        let cache = cluster(3, 1);
        cache.simulate_failure(&[NodeId::new(1), NodeId::new(9)]);
        let health = cache.node_health();
        assert_eq!(health.len(), 3);
        assert_eq!(health[&NodeId::new(0)], true);
        assert_eq!(health[&NodeId::new(1)], false);
        cache.simulate_recovery(&[NodeId::new(1)]);
        assert!(cache.node_health().values().all(|alive| *alive));
    }

    #[test]
    fn test_invalidate_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(4, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &1).unwrap();
        assert_eq!(cache.invalidate(&k), 3);
        assert_eq!(cache.get::<i32>(&k), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_undecodable_copies_are_evicted_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cluster(3, 2);
        let k = key(&dir, "book.xlsx");
        cache.put(&k, &json!({"x": 1})).unwrap();

        assert_eq!(cache.get::<Vec<u32>>(&k), None);
        let stats = cache.stats();
        assert_eq!(stats.primary_hits, 0);
        assert_eq!(stats.replica_hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.corruptions, 3);
        for id in cache.node_ids() {
            assert!(!cache.node(id).unwrap().contains(&k), "{} still holds key", id);
        }
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_replica() {
        let dir = tempfile::tempdir().unwrap();
        let nodes: Vec<ReadOnlyNode> = (0..3)
            .map(|_| ReadOnlyNode {
                data: Mutex::new(HashMap::new()),
            })
            .collect();
        let cache = DistributedCache::with_nodes(nodes, 2).unwrap();
        let k = key(&dir, "book.xlsx");
        let placement = cache.placement(k.identity());
        let seed = |id: NodeId, bytes: &[u8]| {
            cache.nodes[id.index()]
                .data
                .lock()
                .insert(k.identity().to_string(), bytes.to_vec());
        };
        seed(placement.primary, b"not json");
        seed(placement.replicas[0], b"[1,2]");

        assert_eq!(cache.get::<Vec<u32>>(&k), Some(vec![1, 2]));
        let stats = cache.stats();
        assert_eq!(stats.corruptions, 1);
        assert_eq!(stats.replica_hits, 1);
        assert_eq!(stats.primary_hits, 0);
        assert!(cache.nodes[placement.primary.index()].get_local(&k).is_none());
    }

    #[test]
    fn test_empty_table_rejected() {
        let nodes: Vec<FileLevelCache> = vec![];
        assert!(DistributedCache::with_nodes(nodes, 1).is_err());
    }

    /// Node that rejects every write.
    struct ReadOnlyNode {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl CacheNode for ReadOnlyNode {
        fn get_local(&self, key: &CacheKey) -> Option<Vec<u8>> {
            self.data.lock().get(key.identity()).cloned()
        }

        fn put_local(&self, _key: &CacheKey, _payload: &[u8]) -> Result<CacheEntry> {
            Err(Error::Storage("read-only node".into()))
        }

        fn invalidate_local(&self, key: &CacheKey) -> bool {
            self.data.lock().remove(key.identity()).is_some()
        }

        fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    #[test]
    fn test_primary_write_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![ReadOnlyNode {
            data: Mutex::new(HashMap::new()),
        }];
        let cache = DistributedCache::with_nodes(nodes, 0).unwrap();
        let k = key(&dir, "book.xlsx");
        assert!(matches!(cache.put(&k, &1), Err(Error::Storage(_))));
    }
}

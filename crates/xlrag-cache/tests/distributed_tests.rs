//! End-to-end behavior of the partitioned cache.

use serde_json::{Value, json};
use xlrag_cache::{CacheConfig, DistributedCache, DistributedConfig, DiskStore, make_key};
use xlrag_core::NodeId;

fn workbook_key(dir: &tempfile::TempDir, name: &str) -> xlrag_cache::CacheKey {
    let path = dir.path().join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    make_key(&path, &json!({"detect": ["pivot", "cross_tab"]})).unwrap()
}

#[test]
fn test_scenario_replica_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DistributedCache::new(DistributedConfig {
        node_count: 3,
        replication_factor: 2,
        node: CacheConfig::default(),
    })
    .unwrap();
    let key = workbook_key(&dir, "sales.xlsx");
    let payload = json!({"shape": "pivot_table", "entities": ["東京", "大阪"]});

    cache.put(&key, &payload).unwrap();
    let placement = cache.placement(key.identity());
    assert_eq!(placement.replicas.len(), 2);
    assert_eq!(cache.stats().replication_success_count, 2);

    cache.simulate_failure(&[placement.replicas[0]]);
    assert_eq!(cache.get::<Value>(&key), Some(payload));
}

#[test]
fn test_all_replicas_down_primary_still_serves() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DistributedCache::new(DistributedConfig::default()).unwrap();
    let key = workbook_key(&dir, "sales.xlsx");
    let placement = cache.placement(key.identity());

    cache.simulate_failure(&placement.replicas);
    cache.put(&key, &"ok").unwrap();
    assert_eq!(cache.get::<String>(&key).as_deref(), Some("ok"));
    assert_eq!(cache.stats().replication_failure_count, 2);
}

#[test]
fn test_persisted_nodes_use_separate_directories() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("cluster");
    let cache = DistributedCache::new(DistributedConfig {
        node_count: 3,
        replication_factor: 1,
        node: CacheConfig {
            persist_dir: Some(root.clone()),
            ..CacheConfig::default()
        },
    })
    .unwrap();
    let key = workbook_key(&dir, "sales.xlsx");
    cache.put(&key, &1).unwrap();

    let placement = cache.placement(key.identity());
    let holders: Vec<NodeId> = cache
        .node_ids()
        .into_iter()
        .filter(|id| {
            !DiskStore::new(root.join(id.to_string()))
                .list()
                .unwrap()
                .entries
                .is_empty()
        })
        .collect();
    let mut expected = vec![placement.primary, placement.replicas[0]];
    expected.sort();
    assert_eq!(holders, expected);
}

#[test]
fn test_concurrent_puts_with_overlapping_placement() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DistributedCache::new(DistributedConfig {
        node_count: 4,
        replication_factor: 2,
        node: CacheConfig::default(),
    })
    .unwrap();
    let keys: Vec<_> = (0..40)
        .map(|i| workbook_key(&dir, &format!("{}.xlsx", i)))
        .collect();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let cache = &cache;
            let keys = &keys;
            scope.spawn(move || {
                for (i, key) in keys.iter().enumerate().filter(|(i, _)| i % 4 == worker) {
                    cache.put(key, &i).unwrap();
                }
            });
        }
    });

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(cache.get::<usize>(key), Some(i));
    }
    let stats = cache.stats();
    assert_eq!(stats.replication_success_count, 80);
    assert_eq!(stats.primary_hits, 40);
    let stored: usize = stats.nodes.values().map(|s| s.entries).sum();
    assert_eq!(stored, 120);
}

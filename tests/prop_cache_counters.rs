// Property: the cache's byte counters always agree with its contents
//
// For any sequence of writes, reads, removals and sweeps, used disk equals
// the summed sizes of indexed files, used memory never exceeds used disk,
// and a sweep leaves both below their thresholds.

use bytes::Bytes;
use edge_cache::{CacheMetrics, TieredCache, TieredCacheConfig};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

const MEMORY_MAX: u64 = 1024;
const DISK_MAX: u64 = 4096;

#[derive(Debug, Clone)]
enum Op {
    Write(usize, usize),
    Read(usize),
    Remove(usize),
    Evict,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..8, 1usize..600).prop_map(|(key, len)| Op::Write(key, len)),
        3 => (0usize..8).prop_map(Op::Read),
        1 => (0usize..8).prop_map(Op::Remove),
        2 => Just(Op::Evict),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_counters_track_contents(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let temp_dir = tempfile::TempDir::new().unwrap();

        let result: Result<(), TestCaseError> = tokio_test::block_on(async {
            let cache = TieredCache::new(
                TieredCacheConfig {
                    dir: temp_dir.path().to_path_buf(),
                    memory_bytes_max: MEMORY_MAX,
                    disk_bytes_max: DISK_MAX,
                    eviction_interval: Duration::from_secs(60),
                },
                CacheMetrics::new().unwrap(),
            )
            .await
            .unwrap();

            // key -> size of what should be on disk
            let mut model: HashMap<String, u64> = HashMap::new();

            for op in ops {
                match op {
                    Op::Write(key, len) => {
                        let key = format!("k{}", key);
                        cache.write(&key, Bytes::from(vec![0u8; len])).await.unwrap();
                        model.insert(key, len as u64);
                    }
                    Op::Read(key) => {
                        let key = format!("k{}", key);
                        let result = cache.read(&key).await;
                        match model.get(&key) {
                            Some(len) => {
                                prop_assert_eq!(result.unwrap().len() as u64, *len);
                            }
                            None => {
                                prop_assert!(result.unwrap_err().is_not_found());
                            }
                        }
                    }
                    Op::Remove(key) => {
                        let key = format!("k{}", key);
                        let removed = cache.remove(&key).await.unwrap();
                        prop_assert_eq!(removed, model.remove(&key).is_some());
                    }
                    Op::Evict => {
                        let report = cache.evict();
                        for key in &report.disk_removed {
                            prop_assert!(model.remove(key).is_some());
                        }
                        let stats = cache.stats();
                        prop_assert!(stats.memory_bytes <= MEMORY_MAX * 90 / 100);
                        prop_assert!(stats.disk_bytes <= DISK_MAX * 90 / 100);
                    }
                }

                let stats = cache.stats();
                prop_assert_eq!(stats.files, model.len());
                prop_assert_eq!(stats.disk_bytes, model.values().sum::<u64>());
                prop_assert!(stats.memory_bytes <= stats.disk_bytes);
                prop_assert_eq!(cache.recency_order().len(), model.len());
            }

            Ok(())
        });
        result?;
    }
}

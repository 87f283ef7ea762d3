//! Eviction behavior of the tiered cache under small budgets
//!
//! Budgets are 1024 bytes of memory and 4096 bytes of disk, so sweeps
//! trigger above 921 and 3686 bytes respectively.

use bytes::Bytes;
use edge_cache::{
    CacheMetrics, RequestOrchestrator, Residency, TieredCache, TieredCacheConfig, TransferMetrics,
    UploadStaging,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

async fn small_cache(dir: &Path, eviction_interval: Duration) -> TieredCache {
    TieredCache::new(
        TieredCacheConfig {
            dir: dir.to_path_buf(),
            memory_bytes_max: 1024,
            disk_bytes_max: 4096,
            eviction_interval,
        },
        CacheMetrics::new().unwrap(),
    )
    .await
    .unwrap()
}

fn blob(fill: u8, len: usize) -> Bytes {
    Bytes::from(vec![fill; len])
}

#[tokio::test]
async fn test_memory_sweep_demotes_least_recent() {
    let dir = TempDir::new().unwrap();
    let cache = small_cache(dir.path(), Duration::from_secs(60)).await;

    for (i, key) in ["k1", "k2", "k3", "k4", "k5"].iter().enumerate() {
        cache.write(key, blob(i as u8, 300)).await.unwrap();
    }
    assert_eq!(cache.stats().memory_bytes, 1500);

    let report = cache.evict();
    // 1500 -> 1200 -> 900
    assert_eq!(report.memory_demoted, vec!["k1".to_string(), "k2".to_string()]);
    assert!(report.disk_removed.is_empty());

    let stats = cache.stats();
    assert_eq!(stats.memory_bytes, 900);
    assert_eq!(stats.disk_bytes, 1500);
    assert_eq!(stats.files, 5);
    assert_eq!(stats.memory_evictions, 2);

    assert_eq!(cache.residency("k1").await, Some(Residency::NotLoaded));
    assert_eq!(cache.residency("k3").await, Some(Residency::InMemory));

    // Demoted entries are still served, from disk
    assert_eq!(cache.read("k1").await.unwrap(), blob(0, 300));
    assert_eq!(cache.stats().disk_hits, 1);
}

#[tokio::test]
async fn test_sweep_below_threshold_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let cache = small_cache(dir.path(), Duration::from_secs(60)).await;

    cache.write("a", blob(1, 300)).await.unwrap();
    cache.write("b", blob(2, 300)).await.unwrap();
    cache.write("c", blob(3, 300)).await.unwrap();

    assert!(cache.evict().is_empty());
    assert_eq!(cache.stats().memory_bytes, 900);
}

#[tokio::test]
async fn test_disk_sweep_removes_least_recent_files() {
    let dir = TempDir::new().unwrap();
    let cache = small_cache(dir.path(), Duration::from_secs(60)).await;

    let keys: Vec<String> = (0..13).map(|i| format!("f{:02}", i)).collect();
    for key in &keys {
        cache.write(key, blob(7, 300)).await.unwrap();
    }
    // Make f00 the most recently used
    cache.read("f00").await.unwrap();
    assert_eq!(cache.stats().disk_bytes, 3900);

    let report = cache.evict();
    // 3900 -> 3600 after one removal
    assert_eq!(report.disk_removed, vec!["f01".to_string()]);

    assert!(!cache.contains("f01"));
    assert!(!dir.path().join("f01").exists());
    assert!(cache.read("f01").await.unwrap_err().is_not_found());
    assert_eq!(cache.read("f00").await.unwrap(), blob(7, 300));

    let stats = cache.stats();
    assert_eq!(stats.disk_bytes, 3600);
    assert_eq!(stats.files, 12);
    assert_eq!(stats.disk_evictions, 1);
    assert!(stats.memory_bytes <= 921);
}

#[tokio::test]
async fn test_evicted_file_without_remote_is_not_found() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(small_cache(&dir.path().join("download"), Duration::from_secs(60)).await);
    let staging = UploadStaging::new(dir.path().join("upload")).await.unwrap();
    let orchestrator = RequestOrchestrator::new(
        Arc::clone(&cache),
        staging,
        None,
        TransferMetrics::new().unwrap(),
    );

    for i in 0..14 {
        cache.write(&format!("old{}", i), blob(1, 300)).await.unwrap();
    }
    let report = cache.evict();
    assert_eq!(report.disk_removed, vec!["old0".to_string(), "old1".to_string()]);

    // Without a remote store the evicted file is simply gone
    let err = orchestrator.download("/old0").await.unwrap_err();
    assert_eq!(err.to_http_status(), 404);
}

#[tokio::test]
async fn test_eviction_loop_enforces_budgets() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(small_cache(dir.path(), Duration::from_millis(20)).await);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Arc::clone(&cache).spawn_eviction_loop(shutdown_rx);

    for i in 0..20 {
        cache.write(&format!("k{}", i), blob(9, 300)).await.unwrap();
    }

    let mut within_budget = false;
    for _ in 0..100 {
        let stats = cache.stats();
        if stats.memory_bytes <= 921 && stats.disk_bytes <= 3686 {
            within_budget = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(within_budget, "eviction loop never ran: {:?}", cache.stats());
    assert!(!cache.contains("k0"));
    assert!(cache.contains("k19"));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("eviction loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_startup_scan_evicts_oldest_first() {
    let dir = TempDir::new().unwrap();
    let base = std::time::SystemTime::now() - Duration::from_secs(3600);
    for i in 0..14u64 {
        let path = dir.path().join(format!("scan{}", i));
        std::fs::write(&path, vec![0u8; 300]).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(base + Duration::from_secs(i * 10)).unwrap();
    }

    let cache = small_cache(dir.path(), Duration::from_secs(60)).await;
    assert_eq!(cache.stats().disk_bytes, 4200);
    assert_eq!(cache.stats().memory_bytes, 0);

    let report = cache.evict();
    assert!(report.memory_demoted.is_empty());
    assert_eq!(report.disk_removed, vec!["scan0".to_string(), "scan1".to_string()]);
}

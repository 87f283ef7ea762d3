//! Read-through and write-buffering request orchestration
//!
//! Downloads walk the tiers in order: the cache, then the staging buffer,
//! then the remote store. A hit on a lower tier is written into the cache
//! so the next request for the same key is served locally. Only a miss on
//! every tier is reported as not found; any other failure stops the chain.
//!
//! Uploads only ever go to the staging buffer. The sync worker persists
//! them remotely later, so an upload never waits on the remote store.

use crate::error::{EdgeError, Result};
use crate::key::normalize_key;
use crate::metrics::TransferMetrics;
use crate::remote::RemoteStore;
use crate::staging::UploadStaging;
use crate::tiered_cache::TieredCache;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Routes downloads and uploads across the cache, staging and remote tiers
pub struct RequestOrchestrator {
    cache: Arc<TieredCache>,
    staging: UploadStaging,
    remote: Option<Arc<dyn RemoteStore>>,
    metrics: TransferMetrics,
}

impl RequestOrchestrator {
    /// Create an orchestrator
    ///
    /// Without a remote store, the fallback chain ends at staging.
    pub fn new(
        cache: Arc<TieredCache>,
        staging: UploadStaging,
        remote: Option<Arc<dyn RemoteStore>>,
        metrics: TransferMetrics,
    ) -> Self {
        Self {
            cache,
            staging,
            remote,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn staging(&self) -> &UploadStaging {
        &self.staging
    }

    /// Fetch a file from the first tier that has it
    ///
    /// # Errors
    /// - `InvalidKey` if `path` does not name a file
    /// - `NotFound` if no tier has the file
    /// - any other error from the first tier that failed
    pub async fn download(&self, path: &str) -> Result<Bytes> {
        let key = normalize_key(path)?;
        let data = self.fetch(&key).await?;
        self.metrics.record_download(data.len() as u64);
        Ok(data)
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        match self.cache.read(key).await {
            Err(e) if e.is_not_found() => {}
            other => return other,
        }

        if let Some(data) = self.staging.read(key).await? {
            debug!(key = key, "Served from staging");
            self.cache.write(key, data.clone()).await?;
            return Ok(data);
        }

        let Some(remote) = &self.remote else {
            return Err(EdgeError::not_found(key));
        };

        let data = remote.get(key).await?;
        debug!(key = key, size = data.len(), "Fetched from remote store");
        self.cache.write(key, data.clone()).await?;
        Ok(data)
    }

    /// Stage an upload for the sync worker
    ///
    /// Overwrites any previously staged file for the same path. A cached
    /// copy of the key is dropped so the staged bytes are what the next
    /// download returns.
    ///
    /// # Returns
    /// The number of bytes staged
    pub async fn upload(&self, path: &str, data: Bytes) -> Result<u64> {
        let key = normalize_key(path)?;
        let size = self.staging.write(&key, data).await?;
        self.cache.remove(&key).await?;

        self.metrics.record_upload(size);
        info!(key = %key, size = size, "File uploaded successfully");
        Ok(size)
    }

    /// Handle an HTTP POST: a download pre-check followed by the upload
    ///
    /// The pre-check result is discarded.
    pub async fn handle_post(&self, path: &str, data: Bytes) -> Result<u64> {
        if let Err(e) = self.download(path).await {
            debug!(path = path, "Pre-upload download check: {}", e);
        }
        self.upload(path, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CacheMetrics;
    use crate::remote::MemoryObjectStore;
    use crate::tiered_cache::{Residency, TieredCacheConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup(remote: Option<Arc<dyn RemoteStore>>) -> (TempDir, RequestOrchestrator) {
        let temp_dir = TempDir::new().unwrap();
        let cache = TieredCache::new(
            TieredCacheConfig {
                dir: temp_dir.path().join("download"),
                memory_bytes_max: 1024 * 1024,
                disk_bytes_max: 4 * 1024 * 1024,
                eviction_interval: Duration::from_secs(60),
            },
            CacheMetrics::new().unwrap(),
        )
        .await
        .unwrap();
        let staging = UploadStaging::new(temp_dir.path().join("upload")).await.unwrap();
        let orchestrator = RequestOrchestrator::new(
            Arc::new(cache),
            staging,
            remote,
            TransferMetrics::new().unwrap(),
        );
        (temp_dir, orchestrator)
    }

    #[tokio::test]
    async fn test_download_falls_back_to_remote_and_fills_cache() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.insert("media/clip.bin", vec![9u8; 64]);
        let (_dir, orchestrator) = setup(Some(remote.clone())).await;

        let data = orchestrator.download("/media/clip.bin").await.unwrap();
        assert_eq!(data, Bytes::from(vec![9u8; 64]));
        assert_eq!(
            orchestrator.cache().residency("media/clip.bin").await,
            Some(Residency::InMemory)
        );

        // Second request never reaches the remote store
        orchestrator.download("media/clip.bin").await.unwrap();
        assert_eq!(remote.get_count(), 1);
        assert_eq!(orchestrator.cache().stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_download_missing_everywhere() {
        let remote = Arc::new(MemoryObjectStore::new());
        let (_dir, orchestrator) = setup(Some(remote)).await;

        let err = orchestrator.download("/nope").await.unwrap_err();
        assert_eq!(err.to_http_status(), 404);
        assert!(!orchestrator.cache().contains("nope"));
    }

    #[tokio::test]
    async fn test_download_without_remote_stops_at_staging() {
        let (_dir, orchestrator) = setup(None).await;
        assert!(orchestrator.download("/a").await.unwrap_err().is_not_found());

        orchestrator.upload("/a", Bytes::from_static(b"staged")).await.unwrap();
        assert_eq!(
            orchestrator.download("/a").await.unwrap(),
            Bytes::from_static(b"staged")
        );
    }

    #[tokio::test]
    async fn test_invalid_path_is_rejected() {
        let (_dir, orchestrator) = setup(None).await;
        let err = orchestrator.download("/").await.unwrap_err();
        assert_eq!(err.to_http_status(), 400);
        let err = orchestrator
            .upload("/", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.to_http_status(), 400);
    }

    #[tokio::test]
    async fn test_upload_replaces_cached_copy() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.insert("doc.txt", "old");
        let (_dir, orchestrator) = setup(Some(remote)).await;

        assert_eq!(orchestrator.download("/doc.txt").await.unwrap(), "old");
        orchestrator
            .handle_post("/doc.txt", Bytes::from_static(b"new"))
            .await
            .unwrap();
        assert_eq!(orchestrator.download("/doc.txt").await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_a_miss() {
        struct Broken;

        #[async_trait::async_trait]
        impl RemoteStore for Broken {
            async fn get(&self, _key: &str) -> std::result::Result<Bytes, crate::remote::RemoteError> {
                Err(crate::remote::RemoteError::Network("connection refused".to_string()))
            }
            async fn put(
                &self,
                _key: &str,
                _data: Bytes,
            ) -> std::result::Result<(), crate::remote::RemoteError> {
                Ok(())
            }
        }

        let (_dir, orchestrator) = setup(Some(Arc::new(Broken))).await;
        let err = orchestrator.download("/x").await.unwrap_err();
        assert!(matches!(err, EdgeError::RemoteError(_)));
        assert_eq!(err.to_http_status(), 500);
    }
}

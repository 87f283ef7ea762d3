//! Background upload of staged files to the remote store
//!
//! Each cycle lists the staging directory and, for every file, uploads it
//! under its key and then moves it into the cache's serving directory. A
//! file is only moved once the remote store has confirmed the upload;
//! anything that fails stays staged and is retried on the next cycle.
//!
//! A file is claimed (see [`UploadStaging::claim`]) before it is read, so
//! the bytes uploaded are exactly the bytes moved into the cache. If the key
//! is uploaded again meanwhile, the newer file stays staged for the next
//! cycle and the claimed copy is dropped instead of being admitted.

use crate::error::Result;
use crate::remote::RemoteStore;
use crate::staging::{StagedFile, UploadStaging};
use crate::tiered_cache::TieredCache;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys uploaded to the remote store
    pub uploaded: Vec<String>,
    /// Keys left in staging for the next cycle
    pub failed: Vec<String>,
}

/// Periodically drains [`UploadStaging`] into the remote store and the cache
enum SyncOutcome {
    /// Uploaded and moved into the cache
    Admitted,
    /// Uploaded, but a newer upload of the key is already staged
    Superseded,
    /// Nothing staged under the key any more
    Vanished,
}

pub struct SyncWorker {
    staging: UploadStaging,
    cache: Arc<TieredCache>,
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(
        staging: UploadStaging,
        cache: Arc<TieredCache>,
        remote: Arc<dyn RemoteStore>,
        interval: Duration,
    ) -> Self {
        Self {
            staging,
            cache,
            remote,
            interval,
        }
    }

    /// Run one sync cycle
    ///
    /// Claims left behind by an interrupted cycle are released first, so
    /// their files are retried.
    ///
    /// # Errors
    /// Only if the staging directory cannot be listed. Per-file failures
    /// are logged and reported in [`SyncReport::failed`].
    pub async fn sync_once(&self) -> Result<SyncReport> {
        self.staging.recover_claims().await?;
        let staged = self.staging.list().await?;
        let mut report = SyncReport::default();

        for file in staged {
            match self.sync_file(&file).await {
                Ok(SyncOutcome::Admitted) | Ok(SyncOutcome::Superseded) => {
                    report.uploaded.push(file.key)
                }
                Ok(SyncOutcome::Vanished) => {}
                Err(e) => {
                    warn!(key = %file.key, "Sync failed, will retry next cycle: {}", e);
                    report.failed.push(file.key);
                }
            }
        }

        Ok(report)
    }

    /// Upload one staged file and admit it into the cache
    async fn sync_file(&self, file: &StagedFile) -> Result<SyncOutcome> {
        let Some(claimed) = self.staging.claim(&file.key).await? else {
            debug!(key = %file.key, "Staged file disappeared before sync");
            return Ok(SyncOutcome::Vanished);
        };

        match self.upload_claimed(&file.key, &claimed).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release_err) = self.staging.release(&file.key).await {
                    error!(key = %file.key, "Could not release claimed file: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_claimed(&self, key: &str, claimed: &Path) -> Result<SyncOutcome> {
        let data = Bytes::from(fs::read(claimed).await?);
        let size = data.len();
        self.remote.put(key, data).await?;

        // Checked under the cache entry lock: an upload that lands after the
        // check invalidates the admitted copy once the lock is released
        let staged = self.staging.path_for(key);
        let admitted = self
            .cache
            .admit_file_unless(key, claimed, || staged.is_file())
            .await?;

        if admitted.is_none() {
            self.staging.discard_claim(key).await?;
            debug!(key = key, "Synced file superseded by a newer upload");
            return Ok(SyncOutcome::Superseded);
        }
        debug!(key = key, size = size, "Synced file to remote store");
        Ok(SyncOutcome::Admitted)
    }

    /// Start the periodic sync loop
    ///
    /// Waits one interval before the first cycle. The loop exits when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Sync loop started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.sync_once().await {
                    Ok(report) => {
                        if !report.uploaded.is_empty() || !report.failed.is_empty() {
                            info!(
                                uploaded = report.uploaded.len(),
                                failed = report.failed.len(),
                                "Sync cycle finished"
                            );
                        }
                    }
                    Err(e) => error!("Sync cycle abandoned: {}", e),
                }
            }
            info!("Sync loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CacheMetrics;
    use crate::remote::MemoryObjectStore;
    use crate::tiered_cache::TieredCacheConfig;

    #[tokio::test]
    async fn test_empty_staging_is_a_noop() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = TieredCache::new(
            TieredCacheConfig {
                dir: temp_dir.path().join("cache"),
                memory_bytes_max: 1024,
                disk_bytes_max: 4096,
                eviction_interval: Duration::from_secs(60),
            },
            CacheMetrics::new().unwrap(),
        )
        .await
        .unwrap();
        let staging = UploadStaging::new(temp_dir.path().join("upload")).await.unwrap();
        let remote = Arc::new(MemoryObjectStore::new());

        let worker = SyncWorker::new(staging, Arc::new(cache), remote.clone(), Duration::from_secs(1));
        assert_eq!(worker.sync_once().await.unwrap(), SyncReport::default());
        assert_eq!(remote.put_count(), 0);
    }
}

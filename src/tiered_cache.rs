//! Two-tier file cache with a memory tier over a local disk directory
//!
//! Every file the cache knows about lives on disk under the cache directory.
//! Hot files are additionally held in memory. The cache tracks two
//! independent byte budgets:
//! - used memory: the sum of sizes of entries currently held in memory
//! - used disk: the sum of sizes of all indexed entries
//!
//! A periodic sweep demotes least recently used entries out of memory when
//! memory usage exceeds 90% of its budget, and deletes least recently used
//! files from disk when disk usage exceeds 90% of its budget.
//!
//! # Locking
//!
//! Two lock levels:
//! - the cache-wide lock guards the index, the recency list and both byte
//!   counters. It is a plain mutex held only for bookkeeping, never across
//!   disk I/O. Disk eviction picks its victims under it, unlinks their files
//!   after releasing it, then takes it again to drop them from the index.
//! - each entry has its own async mutex guarding its size, residency and
//!   data. It is held across the disk read or write for that entry, so two
//!   requests for the same cold key never both hit the disk, while requests
//!   for different keys run in parallel.
//!
//! Nothing ever waits for an entry lock while holding the cache-wide lock.
//! Request paths may take the cache-wide lock while holding an entry lock;
//! the eviction sweep holds the cache-wide lock and only *tries* entry locks,
//! skipping entries that are busy. Disk victims stay locked from selection
//! until they are dropped from the index, so a concurrent write of the same
//! key waits and then recreates the file rather than losing it to the unlink.

use crate::error::{EdgeError, Result};
use crate::key::{key_to_path, path_to_key, TEMP_FILE_PREFIX};
use crate::metrics::CacheMetrics;
use crate::recency::RecencyList;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Usage level, in percent of the budget, above which a sweep evicts
pub const EVICTION_THRESHOLD_PERCENT: u64 = 90;

/// Whether an entry's content currently occupies memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Residency {
    NotLoaded,
    InMemory,
}

/// Per-entry state, guarded by the entry lock
#[derive(Debug, Default)]
struct EntryState {
    size_bytes: u64,
    /// Present iff the entry is in memory
    data: Option<Bytes>,
    /// Set once the entry has been dropped from the index. Whoever acquires
    /// a detached entry must look the key up again.
    detached: bool,
}

impl EntryState {
    fn residency(&self) -> Residency {
        if self.data.is_some() {
            Residency::InMemory
        } else {
            Residency::NotLoaded
        }
    }
}

type Entry = Arc<tokio::sync::Mutex<EntryState>>;

/// State guarded by the cache-wide lock
#[derive(Default)]
struct CacheState {
    index: HashMap<String, Entry>,
    recency: RecencyList,
    used_memory_bytes: u64,
    used_disk_bytes: u64,
}

impl CacheState {
    /// Drop `key` from the index and recency list if it still maps to `entry`
    fn unindex(&mut self, key: &str, entry: &Entry) {
        let same = self
            .index
            .get(key)
            .map(|current| Arc::ptr_eq(current, entry))
            .unwrap_or(false);
        if same {
            self.index.remove(key);
            self.recency.remove(key);
        }
    }
}

/// Configuration for [`TieredCache`]
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Serving directory; mirrors the remote key namespace
    pub dir: PathBuf,
    pub memory_bytes_max: u64,
    pub disk_bytes_max: u64,
    /// Delay between eviction sweeps
    pub eviction_interval: Duration,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TieredCacheStats {
    pub files: usize,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub memory_evictions: u64,
    pub disk_evictions: u64,
}

/// Keys affected by one eviction sweep, least recently used first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub memory_demoted: Vec<String>,
    pub disk_removed: Vec<String>,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.memory_demoted.is_empty() && self.disk_removed.is_empty()
    }
}

/// An entry picked for disk eviction, locked until it is unindexed
struct DiskVictim {
    key: String,
    entry: Entry,
    guard: OwnedMutexGuard<EntryState>,
}

struct ScannedFile {
    key: String,
    size: u64,
    modified: SystemTime,
}

/// Two-tier cache with memory and disk storage
pub struct TieredCache {
    config: TieredCacheConfig,
    state: Mutex<CacheState>,
    metrics: CacheMetrics,
}

impl TieredCache {
    /// Create a cache over `config.dir`, indexing the files already there
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// indexed as not loaded, with the most recently modified files treated
    /// as the most recently used.
    pub async fn new(config: TieredCacheConfig, metrics: CacheMetrics) -> Result<Self> {
        fs::create_dir_all(&config.dir).await.map_err(|e| {
            EdgeError::IoError(format!(
                "Failed to create cache directory {}: {}",
                config.dir.display(),
                e
            ))
        })?;

        let dir = config.dir.clone();
        let mut scanned = tokio::task::spawn_blocking(move || scan_dir(&dir))
            .await
            .map_err(|e| EdgeError::InternalError(format!("Cache scan task failed: {}", e)))??;

        // Newest first, so that push_back leaves the oldest at the back
        scanned.sort_by(|a, b| b.modified.cmp(&a.modified));

        let mut state = CacheState::default();
        for file in scanned {
            state.used_disk_bytes += file.size;
            state.recency.push_back(&file.key);
            state.index.insert(
                file.key,
                Arc::new(tokio::sync::Mutex::new(EntryState {
                    size_bytes: file.size,
                    data: None,
                    detached: false,
                })),
            );
        }

        info!(
            dir = %config.dir.display(),
            files = state.index.len(),
            disk_bytes = state.used_disk_bytes,
            memory_max = config.memory_bytes_max,
            disk_max = config.disk_bytes_max,
            "Initialized tiered cache"
        );

        let cache = TieredCache {
            config,
            state: Mutex::new(state),
            metrics,
        };
        cache.update_gauges(&cache.state());
        Ok(cache)
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_path(&self, key: &str) -> PathBuf {
        key_to_path(&self.config.dir, key)
    }

    /// Look up or create the index entry for `key`
    ///
    /// Returns the entry and whether this call created it.
    fn entry_or_create(&self, key: &str) -> (Entry, bool) {
        let mut state = self.state();
        if let Some(entry) = state.index.get(key) {
            return (Arc::clone(entry), false);
        }
        let entry: Entry = Arc::new(tokio::sync::Mutex::new(EntryState::default()));
        state.index.insert(key.to_string(), Arc::clone(&entry));
        (entry, true)
    }

    /// Read a file through the cache
    ///
    /// Served from memory when resident; otherwise loaded from disk and
    /// promoted into memory.
    ///
    /// # Errors
    /// - `NotFound` if the key is not indexed, or its file vanished
    /// - `IoError` if the file could not be read; the entry stays not loaded
    pub async fn read(&self, key: &str) -> Result<Bytes> {
        let entry = self.state().index.get(key).cloned();
        let Some(entry) = entry else {
            self.metrics.reads_missed.inc();
            debug!(key = key, "Cache miss");
            return Err(EdgeError::not_found(key));
        };

        let mut guard = entry.lock().await;
        if guard.detached {
            self.metrics.reads_missed.inc();
            debug!(key = key, "Cache miss (entry evicted while waiting)");
            return Err(EdgeError::not_found(key));
        }

        if let Some(data) = &guard.data {
            self.metrics.reads_ram.inc();
            self.state().recency.touch(key);
            debug!(key = key, size = data.len(), "Memory hit");
            return Ok(data.clone());
        }

        self.metrics.reads_disk.inc();
        let path = self.file_path(key);
        match fs::read(&path).await {
            Ok(contents) => {
                let data = Bytes::from(contents);
                let new_size = data.len() as u64;
                let prior_size = guard.size_bytes;
                guard.size_bytes = new_size;
                guard.data = Some(data.clone());

                let mut state = self.state();
                state.used_memory_bytes += new_size;
                state.used_disk_bytes = state.used_disk_bytes.saturating_sub(prior_size) + new_size;
                state.recency.touch(key);
                self.update_gauges(&state);

                debug!(key = key, size = new_size, "Disk hit (promoted to memory)");
                Ok(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Removed behind our back; forget it so lower tiers are asked
                guard.detached = true;
                let mut state = self.state();
                state.used_disk_bytes = state.used_disk_bytes.saturating_sub(guard.size_bytes);
                state.unindex(key, &entry);
                self.update_gauges(&state);

                warn!(key = key, path = %path.display(), "Indexed file vanished from disk");
                Err(EdgeError::not_found(key))
            }
            Err(e) => Err(EdgeError::IoError(format!(
                "Failed to read cache file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write a file into the cache, replacing any previous content
    ///
    /// The file is persisted to the cache directory and kept in memory:
    /// a freshly written file is assumed to be hot.
    ///
    /// # Returns
    /// The number of bytes written
    pub async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        self.metrics.writes.inc();

        loop {
            let (entry, created) = self.entry_or_create(key);
            let mut guard = entry.lock().await;
            if guard.detached {
                continue;
            }

            let path = self.file_path(key);
            if let Err(e) = write_file(&path, &data).await {
                if created {
                    guard.detached = true;
                    let mut state = self.state();
                    state.unindex(key, &entry);
                    self.update_gauges(&state);
                }
                return Err(e);
            }

            let new_size = data.len() as u64;
            let prior_size = guard.size_bytes;
            let prior_in_memory = guard.data.is_some();
            guard.size_bytes = new_size;
            guard.data = Some(data);

            let mut state = self.state();
            if prior_in_memory {
                state.used_memory_bytes = state.used_memory_bytes.saturating_sub(prior_size);
            }
            state.used_memory_bytes += new_size;
            state.used_disk_bytes = state.used_disk_bytes.saturating_sub(prior_size) + new_size;
            state.recency.touch(key);
            self.update_gauges(&state);

            debug!(key = key, size = new_size, "Wrote to cache");
            return Ok(new_size);
        }
    }

    /// Move a local file into the serving directory under `key`
    ///
    /// The entry ends up not loaded, sized after the moved file. Any
    /// in-memory copy is dropped since it may predate the moved content.
    ///
    /// # Returns
    /// The size of the admitted file
    pub async fn admit_file(&self, key: &str, src: &Path) -> Result<u64> {
        self.admit_file_unless(key, src, || false)
            .await?
            .ok_or_else(|| EdgeError::InternalError(format!("Admission of {} was skipped", key)))
    }

    /// Like [`TieredCache::admit_file`], but skipped when `superseded`
    /// returns `true`
    ///
    /// `superseded` runs while the entry lock for `key` is held, so anything
    /// that invalidates `key` through [`TieredCache::remove`] after the check
    /// also removes the admitted file. `src` is left in place when skipped.
    ///
    /// # Returns
    /// The size of the admitted file, or `None` if admission was skipped
    pub async fn admit_file_unless<F>(&self, key: &str, src: &Path, superseded: F) -> Result<Option<u64>>
    where
        F: Fn() -> bool,
    {
        loop {
            let (entry, created) = self.entry_or_create(key);
            let mut guard = entry.lock().await;
            if guard.detached {
                continue;
            }

            if superseded() {
                if created {
                    guard.detached = true;
                    let mut state = self.state();
                    state.unindex(key, &entry);
                    self.update_gauges(&state);
                }
                debug!(key = key, src = %src.display(), "Skipped admission of superseded file");
                return Ok(None);
            }

            let dst = self.file_path(key);
            let moved = move_file(src, &dst).await;
            let new_size = match moved {
                Ok(size) => size,
                Err(e) => {
                    if created {
                        guard.detached = true;
                        let mut state = self.state();
                        state.unindex(key, &entry);
                        self.update_gauges(&state);
                    }
                    return Err(e);
                }
            };

            let prior_size = guard.size_bytes;
            let prior_in_memory = guard.data.take().is_some();
            guard.size_bytes = new_size;

            let mut state = self.state();
            if prior_in_memory {
                state.used_memory_bytes = state.used_memory_bytes.saturating_sub(prior_size);
            }
            state.used_disk_bytes = state.used_disk_bytes.saturating_sub(prior_size) + new_size;
            state.recency.touch(key);
            self.update_gauges(&state);

            debug!(key = key, size = new_size, src = %src.display(), "Admitted file into cache");
            return Ok(Some(new_size));
        }
    }

    /// Drop `key` from both tiers and delete its file
    ///
    /// # Returns
    /// `true` if the key was cached
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let entry = self.state().index.get(key).cloned();
        let Some(entry) = entry else {
            return Ok(false);
        };

        let mut guard = entry.lock().await;
        if guard.detached {
            return Ok(false);
        }

        let path = self.file_path(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                return Err(EdgeError::IoError(format!(
                    "Failed to remove cache file {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        guard.detached = true;
        let mut state = self.state();
        if guard.data.take().is_some() {
            state.used_memory_bytes = state.used_memory_bytes.saturating_sub(guard.size_bytes);
        }
        state.used_disk_bytes = state.used_disk_bytes.saturating_sub(guard.size_bytes);
        state.unindex(key, &entry);
        self.update_gauges(&state);

        debug!(key = key, "Removed from cache");
        Ok(true)
    }

    /// Residency of `key`, or `None` if the key is not indexed
    pub async fn residency(&self, key: &str) -> Option<Residency> {
        let entry = self.state().index.get(key).cloned()?;
        let guard = entry.lock().await;
        if guard.detached {
            None
        } else {
            Some(guard.residency())
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().index.contains_key(key)
    }

    /// Keys from least to most recently used
    pub fn recency_order(&self) -> Vec<String> {
        self.state().recency.iter_lru().map(str::to_string).collect()
    }

    /// Run one eviction sweep: the memory pass, then the disk pass
    ///
    /// Blocks on file removal; call it from a blocking context.
    pub fn evict(&self) -> EvictionReport {
        let (memory_demoted, victims) = {
            let mut state = self.state();
            let demoted = self.evict_memory(&mut state);
            let victims = self.select_disk_victims(&mut state);
            self.update_gauges(&state);
            (demoted, victims)
        };
        let disk_removed = self.evict_disk(victims);

        EvictionReport {
            memory_demoted,
            disk_removed,
        }
    }

    fn evict_memory(&self, state: &mut CacheState) -> Vec<String> {
        let threshold = eviction_threshold(self.config.memory_bytes_max);
        let mut demoted = Vec::new();

        let CacheState {
            index,
            recency,
            used_memory_bytes,
            ..
        } = state;

        // Demotion keeps the key indexed and in place in the recency list
        for key in recency.iter_lru() {
            if *used_memory_bytes <= threshold {
                break;
            }
            let Some(entry) = index.get(key) else {
                continue;
            };
            let Ok(mut guard) = entry.try_lock() else {
                debug!(key = key, "Skipping busy entry during memory eviction");
                continue;
            };
            if guard.data.take().is_some() {
                *used_memory_bytes = used_memory_bytes.saturating_sub(guard.size_bytes);
                self.metrics.evictions_ram.inc();
                demoted.push(key.to_string());
            }
        }

        if !demoted.is_empty() {
            debug!(
                count = demoted.len(),
                used = *used_memory_bytes,
                threshold = threshold,
                "Demoted entries from memory"
            );
        }
        demoted
    }

    /// Lock least recently used entries until the planned usage is back
    /// under the disk threshold
    fn select_disk_victims(&self, state: &mut CacheState) -> Vec<DiskVictim> {
        let threshold = eviction_threshold(self.config.disk_bytes_max);
        let mut victims = Vec::new();
        if state.used_disk_bytes <= threshold {
            return victims;
        }

        let mut planned = state.used_disk_bytes;
        let candidates: Vec<String> = state.recency.iter_lru().map(str::to_string).collect();
        for key in candidates {
            if planned <= threshold {
                break;
            }
            let Some(entry) = state.index.get(&key).cloned() else {
                state.recency.remove(&key);
                continue;
            };
            let Ok(guard) = Arc::clone(&entry).try_lock_owned() else {
                debug!(key = %key, "Skipping busy entry during disk eviction");
                continue;
            };
            planned = planned.saturating_sub(guard.size_bytes);
            victims.push(DiskVictim { key, entry, guard });
        }
        victims
    }

    /// Delete the victims' files, then drop them from the index
    ///
    /// Runs without the cache-wide lock while unlinking. A victim whose
    /// file cannot be removed stays cached.
    fn evict_disk(&self, victims: Vec<DiskVictim>) -> Vec<String> {
        let mut unlinked = Vec::with_capacity(victims.len());
        for victim in victims {
            let path = self.file_path(&victim.key);
            match std::fs::remove_file(&path) {
                Ok(()) => unlinked.push(victim),
                Err(e) if e.kind() == ErrorKind::NotFound => unlinked.push(victim),
                Err(e) => error!(path = %path.display(), "Error removing file: {}", e),
            }
        }
        if unlinked.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(unlinked.len());
        let mut state = self.state();
        for DiskVictim { key, entry, mut guard } in unlinked {
            if guard.data.take().is_some() {
                state.used_memory_bytes = state.used_memory_bytes.saturating_sub(guard.size_bytes);
            }
            state.used_disk_bytes = state.used_disk_bytes.saturating_sub(guard.size_bytes);
            guard.detached = true;
            state.unindex(&key, &entry);
            self.metrics.evictions_disk.inc();
            removed.push(key);
        }
        self.update_gauges(&state);

        debug!(
            count = removed.len(),
            used = state.used_disk_bytes,
            threshold = eviction_threshold(self.config.disk_bytes_max),
            "Evicted entries from disk"
        );
        removed
    }

    /// Start the periodic eviction sweep
    ///
    /// The loop exits when `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_eviction_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.eviction_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!(interval = ?self.config.eviction_interval, "Eviction loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let cache = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || cache.evict()).await {
                    Ok(report) if !report.is_empty() => info!(
                        memory_demoted = report.memory_demoted.len(),
                        disk_removed = report.disk_removed.len(),
                        "Eviction sweep finished"
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Eviction sweep failed: {}", e),
                }
            }
            info!("Eviction loop stopped");
        })
    }

    /// Get cache statistics
    pub fn stats(&self) -> TieredCacheStats {
        let state = self.state();
        TieredCacheStats {
            files: state.index.len(),
            memory_bytes: state.used_memory_bytes,
            disk_bytes: state.used_disk_bytes,
            memory_hits: self.metrics.reads_ram.get(),
            disk_hits: self.metrics.reads_disk.get(),
            misses: self.metrics.reads_missed.get(),
            writes: self.metrics.writes.get(),
            memory_evictions: self.metrics.evictions_ram.get(),
            disk_evictions: self.metrics.evictions_disk.get(),
        }
    }

    fn update_gauges(&self, state: &CacheState) {
        self.metrics.files.set(state.index.len() as i64);
        self.metrics.size_ram_bytes.set(state.used_memory_bytes as i64);
        self.metrics.size_disk_bytes.set(state.used_disk_bytes as i64);
    }
}

fn eviction_threshold(max: u64) -> u64 {
    (u128::from(max) * u128::from(EVICTION_THRESHOLD_PERCENT) / 100) as u64
}

/// Write `data` to `path`, creating parent directories
async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            EdgeError::IoError(format!(
                "Failed to create cache directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    fs::write(path, data).await.map_err(|e| {
        EdgeError::IoError(format!("Failed to write cache file {}: {}", path.display(), e))
    })
}

/// Move `src` to `dst`, copying when a rename is not possible
///
/// Returns the size of the file at its destination.
async fn move_file(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            EdgeError::IoError(format!(
                "Failed to create cache directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(fs::metadata(dst).await?.len()),
        Err(rename_err) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Rename failed ({}), copying instead",
                rename_err
            );
            copy_then_remove(src, dst).await
        }
    }
}

/// Copy `src` over `dst`, then delete `src`
///
/// Once the copy is in place it is reported as moved even if `src` cannot
/// be deleted; the leftover source is only logged. A failed copy leaves
/// `dst` untouched.
async fn copy_then_remove(src: &Path, dst: &Path) -> Result<u64> {
    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    let size = tokio::task::spawn_blocking(move || copy_into_place(&from, &to))
        .await
        .map_err(|e| EdgeError::InternalError(format!("Copy task failed: {}", e)))??;

    if let Err(e) = fs::remove_file(src).await {
        warn!(src = %src.display(), "Copied file but could not remove the source: {}", e);
    }
    Ok(size)
}

/// Copy `src` into a temp file beside `dst`, then rename it over `dst`
fn copy_into_place(src: &Path, dst: &Path) -> Result<u64> {
    let move_err = |e: std::io::Error| {
        EdgeError::IoError(format!(
            "Failed to move {} to {}: {}",
            src.display(),
            dst.display(),
            e
        ))
    };
    let parent = dst.parent().ok_or_else(|| {
        EdgeError::InvalidKey(format!("no parent directory for {}", dst.display()))
    })?;

    let mut reader = std::fs::File::open(src).map_err(move_err)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(parent)
        .map_err(move_err)?;
    let size = std::io::copy(&mut reader, &mut tmp).map_err(move_err)?;
    tmp.persist(dst).map_err(|e| move_err(e.error))?;
    Ok(size)
}

/// Walk `root` and collect every regular file
///
/// Stale temp files from interrupted writes are deleted. Entries that
/// cannot be inspected are logged and skipped.
fn scan_dir(root: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            EdgeError::IoError(format!("Failed to scan {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping file: {}", e);
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            if !metadata.is_file() {
                continue;
            }

            let is_temp = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TEMP_FILE_PREFIX))
                .unwrap_or(false);
            if is_temp {
                debug!(path = %path.display(), "Removing stale temp file");
                let _ = std::fs::remove_file(&path);
                continue;
            }

            let Some(key) = path_to_key(root, &path) else {
                warn!(path = %path.display(), "Skipping file with unusable name");
                continue;
            };

            files.push(ScannedFile {
                key,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
    }

    Ok(files)
}

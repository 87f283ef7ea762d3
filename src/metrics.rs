//! Prometheus metrics for the cache and the transfer paths
//!
//! Collectors are owned by the instance that updates them rather than
//! registered in the process-wide default registry, so several caches can
//! live in one process. Call `register` to expose them on a [`Registry`].

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Counters and gauges reported by [`crate::TieredCache`]
#[derive(Clone)]
pub struct CacheMetrics {
    /// Reads served from memory
    pub reads_ram: IntCounter,
    /// Reads that had to load the file from disk
    pub reads_disk: IntCounter,
    /// Reads for keys the cache does not know
    pub reads_missed: IntCounter,
    pub writes: IntCounter,
    /// Number of indexed files
    pub files: IntGauge,
    pub size_ram_bytes: IntGauge,
    pub size_disk_bytes: IntGauge,
    pub evictions_ram: IntCounter,
    pub evictions_disk: IntCounter,
}

impl CacheMetrics {
    /// Create unregistered cache metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            reads_ram: IntCounter::with_opts(Opts::new(
                "filecache_reads_ram_total",
                "Total number of cache read operations from RAM.",
            ))?,
            reads_disk: IntCounter::with_opts(Opts::new(
                "filecache_reads_disk_total",
                "Total number of cache read operations from disk.",
            ))?,
            reads_missed: IntCounter::with_opts(Opts::new(
                "filecache_reads_missed_total",
                "Total number of cache read operations that failed.",
            ))?,
            writes: IntCounter::with_opts(Opts::new(
                "filecache_writes_total",
                "Total number of cache write operations.",
            ))?,
            files: IntGauge::with_opts(Opts::new(
                "filecache_files",
                "Current number of files in the cache.",
            ))?,
            size_ram_bytes: IntGauge::with_opts(Opts::new(
                "filecache_size_ram_bytes",
                "Current size of the cache in RAM (bytes).",
            ))?,
            size_disk_bytes: IntGauge::with_opts(Opts::new(
                "filecache_size_disk_bytes",
                "Current size of the cache on disk (bytes).",
            ))?,
            evictions_ram: IntCounter::with_opts(Opts::new(
                "filecache_evictions_ram_total",
                "Total number of evictions from RAM.",
            ))?,
            evictions_disk: IntCounter::with_opts(Opts::new(
                "filecache_evictions_disk_total",
                "Total number of evictions from disk.",
            ))?,
        })
    }

    /// Register every collector on `registry`
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.reads_ram.clone()))?;
        registry.register(Box::new(self.reads_disk.clone()))?;
        registry.register(Box::new(self.reads_missed.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.files.clone()))?;
        registry.register(Box::new(self.size_ram_bytes.clone()))?;
        registry.register(Box::new(self.size_disk_bytes.clone()))?;
        registry.register(Box::new(self.evictions_ram.clone()))?;
        registry.register(Box::new(self.evictions_disk.clone()))?;
        Ok(())
    }

    /// Create cache metrics already registered on `registry`
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::new()?;
        metrics.register(registry)?;
        Ok(metrics)
    }
}

/// Upload and download counts and sizes recorded by the orchestrator
#[derive(Clone)]
pub struct TransferMetrics {
    pub uploads: IntCounter,
    pub upload_size_bytes: Histogram,
    pub downloads: IntCounter,
    pub download_size_bytes: Histogram,
}

impl TransferMetrics {
    /// Create unregistered transfer metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            uploads: IntCounter::with_opts(Opts::new(
                "edge_file_uploads_total",
                "Total number of file uploads.",
            ))?,
            upload_size_bytes: Histogram::with_opts(
                HistogramOpts::new(
                    "edge_file_upload_size_bytes",
                    "Histogram of file sizes for uploads.",
                )
                .buckets(size_buckets()?),
            )?,
            downloads: IntCounter::with_opts(Opts::new(
                "edge_file_downloads_total",
                "Total number of file downloads.",
            ))?,
            download_size_bytes: Histogram::with_opts(
                HistogramOpts::new(
                    "edge_file_download_size_bytes",
                    "Histogram of file sizes for downloads.",
                )
                .buckets(size_buckets()?),
            )?,
        })
    }

    /// Register every collector on `registry`
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.uploads.clone()))?;
        registry.register(Box::new(self.upload_size_bytes.clone()))?;
        registry.register(Box::new(self.downloads.clone()))?;
        registry.register(Box::new(self.download_size_bytes.clone()))?;
        Ok(())
    }

    /// Create transfer metrics already registered on `registry`
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::new()?;
        metrics.register(registry)?;
        Ok(metrics)
    }

    pub fn record_upload(&self, size: u64) {
        self.uploads.inc();
        self.upload_size_bytes.observe(size as f64);
    }

    pub fn record_download(&self, size: u64) {
        self.downloads.inc();
        self.download_size_bytes.observe(size as f64);
    }
}

// 1KB, then 1MB steps up to ~9MB
fn size_buckets() -> Result<Vec<f64>, prometheus::Error> {
    prometheus::linear_buckets(1024.0, 1024.0 * 1024.0, 10)
}

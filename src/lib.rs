//! Edge Cache
//!
//! An edge caching proxy that serves files over HTTP from a local tiered
//! cache, fetches from a remote object store on miss, and buffers uploads
//! locally before syncing them to the store in the background.
//!
//! # Architecture
//!
//! - [`TieredCache`]: memory tier over a disk directory, with independent
//!   byte budgets enforced by a periodic least-recently-used sweep
//! - [`UploadStaging`]: durable directory buffering uploads
//! - [`SyncWorker`]: periodically uploads staged files and moves them into
//!   the cache directory
//! - [`RequestOrchestrator`]: the read-through chain (cache, staging,
//!   remote) and the upload path
//! - [`RemoteStore`]: the object store capability, with an S3-compatible
//!   HTTP client and an in-memory store
//! - [`EdgeServer`]: HTTP front end, including `/metrics` and `/stats`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_cache::{
//!     CacheMetrics, EdgeConfig, MemoryObjectStore, RequestOrchestrator, TieredCache,
//!     TransferMetrics, UploadStaging,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EdgeConfig::default();
//! let cache = Arc::new(TieredCache::new(config.tiered_cache_config(), CacheMetrics::new()?).await?);
//! let staging = UploadStaging::new(&config.upload_dir).await?;
//! let orchestrator = RequestOrchestrator::new(
//!     cache,
//!     staging,
//!     Some(Arc::new(MemoryObjectStore::new())),
//!     TransferMetrics::new()?,
//! );
//!
//! orchestrator.upload("/docs/readme.txt", "hello".into()).await?;
//! let data = orchestrator.download("/docs/readme.txt").await?;
//! assert_eq!(data, "hello");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod orchestrator;
pub mod recency;
pub mod remote;
pub mod server;
pub mod staging;
pub mod sync_worker;
pub mod tiered_cache;

// Re-export commonly used types
pub use cli::Cli;
pub use config::{EdgeConfig, RemoteKind};
pub use error::{EdgeError, Result};
pub use key::normalize_key;
pub use metrics::{CacheMetrics, TransferMetrics};
pub use orchestrator::RequestOrchestrator;
pub use recency::RecencyList;
pub use remote::{HttpObjectStore, MemoryObjectStore, RemoteError, RemoteStore};
pub use server::EdgeServer;
pub use staging::{StagedFile, UploadStaging};
pub use sync_worker::{SyncReport, SyncWorker};
pub use tiered_cache::{EvictionReport, Residency, TieredCache, TieredCacheConfig, TieredCacheStats};

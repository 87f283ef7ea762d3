//! Edge Cache Server
//!
//! Loads configuration, sets up logging, and runs the HTTP server together
//! with the eviction and sync loops until Ctrl-C.
//!
//! # Usage
//! ```bash
//! # Defaults, S3 in us-west-2
//! edge-cache
//!
//! # Local development against an in-process store
//! edge-cache --remote memory --cache-dir /tmp/edge/download --upload-dir /tmp/edge/upload
//! ```

use anyhow::Context;
use clap::Parser;
use edge_cache::{
    CacheMetrics, Cli, EdgeConfig, EdgeServer, HttpObjectStore, MemoryObjectStore, RemoteKind,
    RemoteStore, RequestOrchestrator, SyncWorker, TieredCache, TransferMetrics, UploadStaging,
};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.max_log_level()?)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting edge cache server");
    info!("  - Cache dir: {}", config.cache_dir.display());
    info!("  - Upload dir: {}", config.upload_dir.display());
    info!("  - Memory budget: {} bytes", config.cache_ram_bytes_max);
    info!("  - Disk budget: {} bytes", config.cache_disk_bytes_max);
    info!("  - Remote: {:?} (bucket {}, region {})", config.remote, config.s3_bucket, config.aws_region);

    let registry = Registry::new();
    let cache_metrics = CacheMetrics::with_registry(&registry).context("Failed to register cache metrics")?;
    let transfer_metrics =
        TransferMetrics::with_registry(&registry).context("Failed to register transfer metrics")?;

    let cache = Arc::new(
        TieredCache::new(config.tiered_cache_config(), cache_metrics)
            .await
            .context("Failed to initialize cache")?,
    );
    let staging = UploadStaging::new(&config.upload_dir)
        .await
        .context("Failed to initialize upload staging")?;
    let remote = build_remote(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let eviction = Arc::clone(&cache).spawn_eviction_loop(shutdown_rx.clone());
    let sync = Arc::new(SyncWorker::new(
        staging.clone(),
        Arc::clone(&cache),
        Arc::clone(&remote),
        config.sync_interval(),
    ))
    .spawn(shutdown_rx.clone());

    let orchestrator = Arc::new(RequestOrchestrator::new(cache, staging, Some(remote), transfer_metrics));
    let server = Arc::new(EdgeServer::new(orchestrator, registry));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let server_task = tokio::spawn(server.run(listener, shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    if shutdown_tx.send(true).is_err() {
        warn!("Every background task had already stopped");
    }

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server failed: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
    for (name, task) in [("eviction", eviction), ("sync", sync)] {
        if let Err(e) = task.await {
            error!("{} loop panicked: {}", name, e);
        }
    }

    info!("Edge cache server stopped");
    Ok(())
}

fn build_remote(config: &EdgeConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match config.remote {
        RemoteKind::Memory => {
            warn!("Using the in-memory remote store; synced files are lost on exit");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
        RemoteKind::S3 => {
            let endpoint = config
                .remote_endpoint
                .clone()
                .unwrap_or_else(|| HttpObjectStore::aws_endpoint(&config.aws_region));
            info!("  - Remote endpoint: {}", endpoint);
            let store = HttpObjectStore::new(endpoint, config.s3_bucket.clone(), config.aws_region.clone())
                .context("Failed to create remote store client")?;
            Ok(Arc::new(store))
        }
    }
}

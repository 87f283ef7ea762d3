//! Command-line interface
//!
//! Every option can also be set through the environment variable named
//! after it. Precedence: flag or environment, then the YAML file given
//! with `--config`, then built-in defaults.

use crate::config::{EdgeConfig, RemoteKind};
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "edge-cache", version, about = "Edge caching proxy in front of an object store")]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, env = "EDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serving directory of the cache
    #[arg(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Staging directory for uploads
    #[arg(long, env = "UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Memory budget in bytes
    #[arg(long, env = "CACHE_RAM_BYTES_MAX")]
    pub cache_ram_bytes_max: Option<u64>,

    /// Disk budget in bytes
    #[arg(long, env = "CACHE_DISK_BYTES_MAX")]
    pub cache_disk_bytes_max: Option<u64>,

    /// Seconds between eviction sweeps
    #[arg(long, env = "CACHE_EVICTION_TICK")]
    pub cache_eviction_tick: Option<u64>,

    /// Seconds between syncs to the remote store
    #[arg(long, env = "SYNC_DELAY")]
    pub sync_delay: Option<u64>,

    /// Remote store implementation
    #[arg(long, env = "REMOTE", value_enum)]
    pub remote: Option<RemoteKind>,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Object store endpoint, e.g. http://localhost:9000
    #[arg(long, env = "REMOTE_ENDPOINT")]
    pub remote_endpoint: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// ERROR, WARN, INFO, DEBUG or TRACE
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Resolve the effective, validated configuration
    pub fn load_config(&self) -> Result<EdgeConfig> {
        let mut config = match &self.config {
            Some(path) => EdgeConfig::parse_file(path)?,
            None => EdgeConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut EdgeConfig) {
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.upload_dir {
            config.upload_dir = dir.clone();
        }
        if let Some(bytes) = self.cache_ram_bytes_max {
            config.cache_ram_bytes_max = bytes;
        }
        if let Some(bytes) = self.cache_disk_bytes_max {
            config.cache_disk_bytes_max = bytes;
        }
        if let Some(secs) = self.cache_eviction_tick {
            config.cache_eviction_tick_secs = secs;
        }
        if let Some(secs) = self.sync_delay {
            config.sync_delay_secs = secs;
        }
        if let Some(remote) = self.remote {
            config.remote = remote;
        }
        if let Some(bucket) = &self.s3_bucket {
            config.s3_bucket = bucket.clone();
        }
        if let Some(region) = &self.aws_region {
            config.aws_region = region.clone();
        }
        if let Some(endpoint) = &self.remote_endpoint {
            config.remote_endpoint = Some(endpoint.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

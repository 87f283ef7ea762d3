//! Configuration management for the edge cache

use crate::error::{EdgeError, Result};
use crate::tiered_cache::TieredCacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which remote store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// S3-compatible object store over HTTP
    S3,
    /// In-process store; contents are lost on exit
    Memory,
}

/// Configuration for the edge cache server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Serving directory of the tiered cache (default: /var/edgie/cache/download)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Staging directory for uploads not yet synced (default: /var/edgie/cache/upload)
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Memory budget in bytes (default: 100MB)
    #[serde(default = "default_cache_ram_bytes_max")]
    pub cache_ram_bytes_max: u64,

    /// Disk budget in bytes (default: 10GB)
    #[serde(default = "default_cache_disk_bytes_max")]
    pub cache_disk_bytes_max: u64,

    /// Seconds between eviction sweeps (default: 10)
    #[serde(default = "default_interval_secs")]
    pub cache_eviction_tick_secs: u64,

    /// Seconds between sync cycles (default: 10)
    #[serde(default = "default_interval_secs")]
    pub sync_delay_secs: u64,

    #[serde(default = "default_remote")]
    pub remote: RemoteKind,

    /// Bucket holding the objects (default: edgie)
    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: String,

    /// Region of the bucket (default: us-west-2)
    #[serde(default = "default_aws_region")]
    pub aws_region: String,

    /// Store endpoint; derived from the region when unset
    #[serde(default)]
    pub remote_endpoint: Option<String>,

    /// Listening port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum log level (default: WARN)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/edgie/cache/download")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("/var/edgie/cache/upload")
}

fn default_cache_ram_bytes_max() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_cache_disk_bytes_max() -> u64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_interval_secs() -> u64 {
    10
}

fn default_remote() -> RemoteKind {
    RemoteKind::S3
}

fn default_s3_bucket() -> String {
    "edgie".to_string()
}

fn default_aws_region() -> String {
    "us-west-2".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "WARN".to_string()
}

impl Default for EdgeConfig {
    fn default() -> Self {
        EdgeConfig {
            cache_dir: default_cache_dir(),
            upload_dir: default_upload_dir(),
            cache_ram_bytes_max: default_cache_ram_bytes_max(),
            cache_disk_bytes_max: default_cache_disk_bytes_max(),
            cache_eviction_tick_secs: default_interval_secs(),
            sync_delay_secs: default_interval_secs(),
            remote: default_remote(),
            s3_bucket: default_s3_bucket(),
            aws_region: default_aws_region(),
            remote_endpoint: None,
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl EdgeConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file without validating it
    ///
    /// Missing fields take their defaults.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EdgeError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| EdgeError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - cache_dir and upload_dir must be set, distinct, and neither may
    ///   contain the other
    /// - both byte budgets must be > 0
    /// - both intervals must be > 0
    /// - s3_bucket and aws_region must not be empty
    /// - log_level must name a tracing level
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(EdgeError::ConfigError("cache_dir must not be empty".to_string()));
        }
        if self.upload_dir.as_os_str().is_empty() {
            return Err(EdgeError::ConfigError("upload_dir must not be empty".to_string()));
        }
        if self.cache_dir == self.upload_dir {
            return Err(EdgeError::ConfigError(format!(
                "cache_dir and upload_dir must differ, both are {}",
                self.cache_dir.display()
            )));
        }
        // The startup scan would index unsynced uploads as cache files, and
        // a staging listing would pick up cached files as uploads
        if self.upload_dir.starts_with(&self.cache_dir)
            || self.cache_dir.starts_with(&self.upload_dir)
        {
            return Err(EdgeError::ConfigError(format!(
                "cache_dir ({}) and upload_dir ({}) must not be nested",
                self.cache_dir.display(),
                self.upload_dir.display()
            )));
        }

        if self.cache_ram_bytes_max == 0 {
            return Err(EdgeError::ConfigError(
                "cache_ram_bytes_max must be greater than 0".to_string(),
            ));
        }
        if self.cache_disk_bytes_max == 0 {
            return Err(EdgeError::ConfigError(
                "cache_disk_bytes_max must be greater than 0".to_string(),
            ));
        }

        if self.cache_eviction_tick_secs == 0 {
            return Err(EdgeError::ConfigError(
                "cache_eviction_tick_secs must be greater than 0".to_string(),
            ));
        }
        if self.sync_delay_secs == 0 {
            return Err(EdgeError::ConfigError(
                "sync_delay_secs must be greater than 0".to_string(),
            ));
        }

        if self.s3_bucket.trim().is_empty() {
            return Err(EdgeError::ConfigError("s3_bucket must not be empty".to_string()));
        }
        if self.aws_region.trim().is_empty() {
            return Err(EdgeError::ConfigError("aws_region must not be empty".to_string()));
        }

        self.max_log_level()?;
        Ok(())
    }

    /// Parsed `log_level`
    pub fn max_log_level(&self) -> Result<tracing::Level> {
        self.log_level.parse().map_err(|_| {
            EdgeError::ConfigError(format!(
                "Invalid log_level '{}', expected one of ERROR, WARN, INFO, DEBUG, TRACE",
                self.log_level
            ))
        })
    }

    pub fn tiered_cache_config(&self) -> TieredCacheConfig {
        TieredCacheConfig {
            dir: self.cache_dir.clone(),
            memory_bytes_max: self.cache_ram_bytes_max,
            disk_bytes_max: self.cache_disk_bytes_max,
            eviction_interval: Duration::from_secs(self.cache_eviction_tick_secs),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EdgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8080);
        assert_eq!(config.s3_bucket, "edgie");
        assert_eq!(config.aws_region, "us-west-2");
        assert_eq!(config.max_log_level().unwrap(), tracing::Level::WARN);
        assert_eq!(config.sync_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_dir: /tmp/edge/download").unwrap();
        writeln!(file, "cache_ram_bytes_max: 2048").unwrap();
        writeln!(file, "remote: memory").unwrap();

        let config = EdgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/edge/download"));
        assert_eq!(config.upload_dir, default_upload_dir());
        assert_eq!(config.cache_ram_bytes_max, 2048);
        assert_eq!(config.remote, RemoteKind::Memory);

        let cache_config = config.tiered_cache_config();
        assert_eq!(cache_config.memory_bytes_max, 2048);
        assert_eq!(cache_config.eviction_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_validation_failures() {
        let same_dirs = EdgeConfig {
            upload_dir: default_cache_dir(),
            ..Default::default()
        };
        assert!(matches!(same_dirs.validate(), Err(EdgeError::ConfigError(_))));

        let upload_inside_cache = EdgeConfig {
            cache_dir: PathBuf::from("/tmp/edge/cache"),
            upload_dir: PathBuf::from("/tmp/edge/cache/upload"),
            ..Default::default()
        };
        assert!(matches!(
            upload_inside_cache.validate(),
            Err(EdgeError::ConfigError(_))
        ));

        let cache_inside_upload = EdgeConfig {
            cache_dir: PathBuf::from("/tmp/edge/upload/download"),
            upload_dir: PathBuf::from("/tmp/edge/upload"),
            ..Default::default()
        };
        assert!(cache_inside_upload.validate().is_err());

        // Siblings sharing a name prefix are fine
        let siblings = EdgeConfig {
            cache_dir: PathBuf::from("/tmp/edge/cache"),
            upload_dir: PathBuf::from("/tmp/edge/cache-upload"),
            ..Default::default()
        };
        assert!(siblings.validate().is_ok());

        let zero_budget = EdgeConfig {
            cache_disk_bytes_max: 0,
            ..Default::default()
        };
        assert!(zero_budget.validate().is_err());

        let zero_tick = EdgeConfig {
            cache_eviction_tick_secs: 0,
            ..Default::default()
        };
        assert!(zero_tick.validate().is_err());

        let no_bucket = EdgeConfig {
            s3_bucket: "  ".to_string(),
            ..Default::default()
        };
        assert!(no_bucket.validate().is_err());

        let bad_level = EdgeConfig {
            log_level: "LOUD".to_string(),
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = EdgeConfig::from_file("/nonexistent/edge.yaml");
        assert!(matches!(result, Err(EdgeError::ConfigError(_))));
    }
}

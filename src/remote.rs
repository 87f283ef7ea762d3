//! Remote durable object store
//!
//! The cache only needs two calls from the store: fetch an object by key and
//! store an object under a key. [`RemoteStore`] captures exactly that, so the
//! orchestrator and the sync worker can run against any backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use reqwest::Url;
use tracing::debug;

/// Timeout applied to every request against the remote store
pub const REMOTE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote store error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Remote store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RemoteError {
    /// Classify a non-success HTTP status from the store
    pub fn from_status(key: &str, status: u16, body: &str) -> Self {
        match status {
            404 => RemoteError::NotFound(key.to_string()),
            _ => RemoteError::Status {
                status,
                message: body.to_string(),
            },
        }
    }
}

/// GET and PUT of opaque blobs keyed by path
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the object stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes, RemoteError>;

    /// Store `data` under `key`, replacing any previous object
    async fn put(&self, key: &str, data: Bytes) -> Result<(), RemoteError>;
}

/// Client for an S3-compatible object store using path-style addressing
///
/// Objects live at `{endpoint}/{bucket}/{key}`. Each key segment is
/// percent-encoded, so characters such as `?`, `#` and spaces stay part of
/// the object name.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    region: String,
}

impl HttpObjectStore {
    /// Create a client for `bucket` on `endpoint`
    ///
    /// # Errors
    /// Fails if `endpoint` is not an absolute http(s) URL, or if the
    /// underlying HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let endpoint = endpoint.into();
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteError::InvalidEndpoint(endpoint.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(REMOTE_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            region: region.into(),
        })
    }

    /// Default endpoint for an AWS region
    pub fn aws_endpoint(region: &str) -> String {
        format!("https://s3.{}.amazonaws.com", region)
    }

    fn object_url(&self, key: &str) -> Result<Url, RemoteError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, RemoteError> {
        let url = self.object_url(key)?;
        debug!(key = key, url = %url, "Remote GET");

        let response = self
            .client
            .get(url)
            .header("x-amz-bucket-region", &self.region)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(key, status.as_u16(), &body));
        }

        response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), RemoteError> {
        let url = self.object_url(key)?;
        debug!(key = key, url = %url, size = data.len(), "Remote PUT");

        let response = self
            .client
            .put(url)
            .header("x-amz-bucket-region", &self.region)
            .body(data)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(key, status.as_u16(), &body));
        }

        Ok(())
    }
}

/// In-process object store
///
/// Backs local development (`--remote memory`) and tests. Puts for keys
/// registered with [`MemoryObjectStore::fail_puts_for`] fail with a
/// network error until [`MemoryObjectStore::clear_failures`] is called.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    failing_puts: Mutex<HashSet<String>>,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the put counter
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn fail_puts_for(&self, key: &str) {
        self.failing_puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of `get` calls served so far
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of successful `put` calls so far
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, RemoteError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.object(key)
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), RemoteError> {
        let failing = self
            .failing_puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if failing {
            return Err(RemoteError::Network(format!("injected failure for {}", key)));
        }

        self.insert(key, data);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

//! Object storage: a thin [`ObjectStore`] seam plus the [`StorageGateway`]
//! that every pipeline stage goes through.
//!
//! The gateway owns three cross-cutting rules so that store implementations
//! stay dumb:
//!
//! 1. relative paths are resolved through the [`BlobPathResolver`];
//! 2. transient failures (5xx, timeouts, connection errors) are retried with
//!    exponential backoff, while 404 and other 4xx fail immediately;
//! 3. uploads into the configured read-only source container are refused
//!    before the store is ever called.

pub mod http;
pub mod memory;

use crate::blob_path::BlobPathResolver;
use crate::config::IntakeConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

/// A container + resolved path pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlobLocation {
    pub container: String,
    pub path: String,
}

impl BlobLocation {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

/// Raw blob operations. Implementations classify failures into
/// [`StorageError`] but never retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a blob by container and path.
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError>;

    /// Fetch a blob by absolute URL.
    async fn get_url(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite a blob.
    async fn put(
        &self,
        location: &BlobLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// `Ok(false)` for a missing blob; errors only for other failures.
    async fn exists(&self, location: &BlobLocation) -> Result<bool, StorageError>;

    /// Remove a blob. A missing blob is reported as [`StorageError::NotFound`].
    async fn delete(&self, location: &BlobLocation) -> Result<(), StorageError>;

    /// Absolute URL of a location in this store.
    fn url_for(&self, location: &BlobLocation) -> String;
}

/// Exponential backoff policy for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `backoff_ms * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut last_err: Option<StorageError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                operation,
                attempt,
                policy.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!("{}: permanent failure: {}", operation, e);
                return Err(e);
            }
            Err(e) => {
                warn!("{}: attempt {} failed: {}", operation, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(StorageError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: policy.max_retries + 1,
        last_error: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Retrying, path-resolving, write-guarded access to an [`ObjectStore`].
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    resolver: BlobPathResolver,
    policy: RetryPolicy,
    source_container: Option<String>,
}

impl fmt::Debug for StorageGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageGateway")
            .field("store", &"<dyn ObjectStore>")
            .field("resolver", &self.resolver)
            .field("policy", &self.policy)
            .field("source_container", &self.source_container)
            .finish()
    }
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, config: &IntakeConfig) -> Self {
        Self {
            store,
            resolver: BlobPathResolver::new(config.blob_prefix.as_deref()),
            policy: RetryPolicy {
                max_retries: config.storage_max_retries,
                backoff_ms: config.storage_backoff_ms,
            },
            source_container: config.source_container.clone(),
        }
    }

    pub fn resolver(&self) -> &BlobPathResolver {
        &self.resolver
    }

    /// Location of `path` in `container` after prefix resolution.
    pub fn location(&self, container: &str, path: &str) -> BlobLocation {
        BlobLocation::new(container.trim(), self.resolver.resolve(path))
    }

    pub fn url_for(&self, location: &BlobLocation) -> String {
        self.store.url_for(location)
    }

    pub async fn download(&self, container: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        let location = self.location(container, path);
        let op = format!("download {location}");
        with_retry(&self.policy, &op, || self.store.get(&location)).await
    }

    /// Download from an absolute URL (source documents carry these).
    pub async fn download_url(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        with_retry(&self.policy, "download source", || self.store.get_url(url)).await
    }

    /// Upload `bytes`, refusing the read-only source container outright.
    pub async fn upload(
        &self,
        container: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<BlobLocation, StorageError> {
        self.ensure_writable(container)?;
        let location = self.location(container, path);
        let op = format!("upload {location}");
        with_retry(&self.policy, &op, || {
            self.store.put(&location, bytes, content_type)
        })
        .await?;
        debug!("Uploaded {} bytes to {}", bytes.len(), location);
        Ok(location)
    }

    pub async fn exists(&self, container: &str, path: &str) -> Result<bool, StorageError> {
        let location = self.location(container, path);
        let op = format!("exists {location}");
        with_retry(&self.policy, &op, || self.store.exists(&location)).await
    }

    /// Delete a blob. Returns `false` when it was already absent.
    pub async fn delete(&self, container: &str, path: &str) -> Result<bool, StorageError> {
        self.ensure_writable(container)?;
        let location = self.location(container, path);
        let op = format!("delete {location}");
        match with_retry(&self.policy, &op, || self.store.delete(&location)).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn ensure_writable(&self, container: &str) -> Result<(), StorageError> {
        let is_source = self
            .source_container
            .as_deref()
            .map(|src| src.trim().eq_ignore_ascii_case(container.trim()))
            .unwrap_or(false);
        if is_source {
            warn!("Blocked write into read-only container '{}'", container);
            return Err(StorageError::ReadOnlyContainer {
                container: container.to_string(),
            });
        }
        Ok(())
    }
}

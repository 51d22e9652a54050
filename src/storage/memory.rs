//! In-process object store used by the CLI's dry-run mode and by tests.

use super::{BlobLocation, ObjectStore};
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// A `BTreeMap`-backed [`ObjectStore`].
///
/// URLs have the form `{base_url}/{container}/{path}`; [`ObjectStore::get_url`]
/// accepts only URLs under `base_url`.
#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    blobs: Mutex<BTreeMap<BlobLocation, StoredBlob>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://store")
    }
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Seed a blob directly, bypassing the gateway's write guard.
    pub fn insert(&self, location: BlobLocation, bytes: Vec<u8>, content_type: &str) {
        self.lock().insert(
            location,
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }

    /// All stored locations in sorted order.
    pub fn locations(&self) -> Vec<BlobLocation> {
        self.lock().keys().cloned().collect()
    }

    pub fn content_type(&self, location: &BlobLocation) -> Option<String> {
        self.lock().get(location).map(|b| b.content_type.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<BlobLocation, StoredBlob>> {
        // A poisoned map still holds consistent blobs: every write is a single insert.
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn parse_url(&self, url: &str) -> Option<BlobLocation> {
        let rest = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        let (container, path) = rest.split_once('/')?;
        if container.is_empty() || path.is_empty() {
            return None;
        }
        Some(BlobLocation::new(container, path))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        self.lock()
            .get(location)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StorageError::NotFound {
                location: location.to_string(),
            })
    }

    async fn get_url(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let location = self
            .parse_url(url)
            .ok_or_else(|| StorageError::UnsupportedLocation(url.to_string()))?;
        self.get(&location).await
    }

    async fn put(
        &self,
        location: &BlobLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.insert(location.clone(), bytes.to_vec(), content_type);
        Ok(())
    }

    async fn exists(&self, location: &BlobLocation) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(location))
    }

    async fn delete(&self, location: &BlobLocation) -> Result<(), StorageError> {
        self.lock()
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                location: location.to_string(),
            })
    }

    fn url_for(&self, location: &BlobLocation) -> String {
        format!("{}/{}/{}", self.base_url, location.container, location.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_round_trip() {
        let store = MemoryObjectStore::new("memory://acct/");
        let loc = BlobLocation::new("intake", "case-1/a.pdf");
        store.insert(loc.clone(), b"abc".to_vec(), "application/pdf");

        let url = store.url_for(&loc);
        assert_eq!(url, "memory://acct/intake/case-1/a.pdf");
        let bytes = tokio_test::block_on(store.get_url(&url)).unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn foreign_url_is_unsupported() {
        let store = MemoryObjectStore::default();
        let err = store.get_url("https://elsewhere/c/p").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedLocation(_)));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryObjectStore::default();
        let err = store.delete(&BlobLocation::new("c", "p")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!store.exists(&BlobLocation::new("c", "p")).await.unwrap());
    }
}

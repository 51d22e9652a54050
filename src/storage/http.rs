//! REST blob store over `reqwest`.
//!
//! Speaks the minimal subset of the Azure-Blob-style REST surface:
//! `GET`/`PUT`/`HEAD`/`DELETE` on `{base}/{container}/{path}`. A credential
//! containing `=` is treated as a SAS query string, anything else as a bearer
//! token.

use super::{BlobLocation, ObjectStore};
use crate::config::IntakeConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// [`ObjectStore`] backed by an HTTP blob service.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &IntakeConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.storage_timeout_secs))
            .build()
            .map_err(|e| StorageError::UnsupportedLocation(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.storage_base_url.trim_end_matches('/').to_string(),
            token: config.storage_token.clone(),
        })
    }

    fn is_sas(&self) -> bool {
        self.token.as_deref().map(|t| t.contains('=')).unwrap_or(false)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) if !self.is_sas() => request.bearer_auth(token),
            _ => request,
        }
    }

    fn with_sas(&self, url: String) -> String {
        match self.token.as_deref() {
            Some(sas) if self.is_sas() => {
                let sas = sas.trim_start_matches('?');
                if url.contains('?') {
                    format!("{url}&{sas}")
                } else {
                    format!("{url}?{sas}")
                }
            }
            _ => url,
        }
    }

    fn request_url(&self, location: &BlobLocation) -> String {
        self.with_sas(self.url_for(location))
    }
}

/// Map a transport-level failure to the transient / permanent split.
fn classify_transport(location: &str, e: reqwest::Error) -> StorageError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        StorageError::Transient {
            location: location.to_string(),
            reason: if e.is_timeout() {
                "timed out".to_string()
            } else {
                "connection failed".to_string()
            },
        }
    } else if e.is_builder() {
        StorageError::UnsupportedLocation(location.to_string())
    } else {
        StorageError::Transient {
            location: location.to_string(),
            reason: e.to_string(),
        }
    }
}

fn check_status(location: &str, status: StatusCode) -> Result<(), StorageError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::from_status(location, status.as_u16()))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        let label = location.to_string();
        let url = self.request_url(location);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        check_status(&label, response.status())?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        debug!("GET {} → {} bytes", label, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn get_url(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        // Only attach our credential to URLs that point at our own service.
        let own = url.starts_with(&self.base_url);
        let request_url = if own {
            self.with_sas(url.to_string())
        } else {
            url.to_string()
        };
        let label = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "<source>".to_string());
        let mut request = self.client.get(&request_url);
        if own {
            request = self.authorize(request);
        }
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        check_status(&label, response.status())?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        Ok(bytes.to_vec())
    }

    async fn put(
        &self,
        location: &BlobLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let label = location.to_string();
        let url = self.request_url(location);
        let response = self
            .authorize(self.client.put(&url))
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        check_status(&label, response.status())
    }

    async fn exists(&self, location: &BlobLocation) -> Result<bool, StorageError> {
        let label = location.to_string();
        let url = self.request_url(location);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status => check_status(&label, status).map(|_| true),
        }
    }

    async fn delete(&self, location: &BlobLocation) -> Result<(), StorageError> {
        let label = location.to_string();
        let url = self.request_url(location);
        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| classify_transport(&label, e))?;
        check_status(&label, response.status())
    }

    fn url_for(&self, location: &BlobLocation) -> String {
        match Url::parse(&self.base_url) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop_if_empty();
                    segments.push(&location.container);
                    for part in location.path.split('/').filter(|p| !p.is_empty()) {
                        segments.push(part);
                    }
                }
                url.to_string()
            }
            Err(_) => format!("{}/{}/{}", self.base_url, location.container, location.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(token: Option<&str>) -> HttpObjectStore {
        let mut builder = IntakeConfig::builder().storage_base_url("https://acct.blob.example.net/");
        if let Some(t) = token {
            builder = builder.storage_token(t);
        }
        HttpObjectStore::new(&builder.build().unwrap()).unwrap()
    }

    #[test]
    fn url_for_encodes_segments() {
        let s = store(None);
        let url = s.url_for(&BlobLocation::new("processed", "case 1/pages/page_0001.pdf"));
        assert_eq!(
            url,
            "https://acct.blob.example.net/processed/case%201/pages/page_0001.pdf"
        );
    }

    #[test]
    fn sas_token_goes_into_query() {
        let s = store(Some("?sv=2024&sig=abc"));
        let url = s.request_url(&BlobLocation::new("c", "p.pdf"));
        assert!(url.ends_with("/c/p.pdf?sv=2024&sig=abc"), "got {url}");
    }

    #[test]
    fn bearer_token_stays_out_of_url() {
        let s = store(Some("opaque-token"));
        let url = s.request_url(&BlobLocation::new("c", "p.pdf"));
        assert!(!url.contains("opaque-token"));
    }
}

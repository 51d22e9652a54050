//! Configuration types for document intake.
//!
//! All intake behaviour is controlled through [`IntakeConfig`], built via its
//! [`IntakeConfigBuilder`]. Every knob lives in one struct so a config can be
//! shared across tasks, logged, and compared between runs.

use crate::blob_path::sanitize_prefix;
use crate::error::IntakeError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Configuration for the intake pipeline.
///
/// Built via [`IntakeConfig::builder()`] or using [`IntakeConfig::default()`].
///
/// # Example
/// ```rust
/// use case_intake::IntakeConfig;
///
/// let config = IntakeConfig::builder()
///     .storage_base_url("https://acct.blob.core.windows.net")
///     .default_container("intake")
///     .source_container("inbound")
///     .target_container("processed")
///     .blob_prefix("/prod/")
///     .build()
///     .unwrap();
/// assert_eq!(config.blob_prefix.as_deref(), Some("prod"));
/// ```
#[derive(Clone)]
pub struct IntakeConfig {
    /// Base URL that relative blob paths are resolved against,
    /// e.g. `https://acct.blob.core.windows.net`.
    pub storage_base_url: String,

    /// Optional prefix prepended to every relative blob path. Sanitised:
    /// surrounding slashes and whitespace stripped, empty means unset.
    pub blob_prefix: Option<String>,

    /// Container used for relative `blobPath`s with no recognised channel
    /// segment. Default: `intake`.
    pub default_container: String,

    /// Containers recognised when they appear as the first segment of a
    /// relative `blobPath`. Such a segment overrides `default_container`.
    pub channel_containers: Vec<String>,

    /// Read-only container holding inbound sources. Uploads into it are
    /// rejected before any network call.
    pub source_container: Option<String>,

    /// Container receiving consolidated and per-page PDFs. Default: `processed`.
    pub target_container: String,

    /// SAS token or bearer credential for the blob service.
    pub storage_token: Option<String>,

    /// Maximum retry attempts on a transient storage failure. Default: 3.
    ///
    /// 404 and other 4xx responses are never retried.
    pub storage_max_retries: u32,

    /// Initial storage retry delay in milliseconds, doubled per attempt. Default: 500.
    pub storage_backoff_ms: u64,

    /// Per-request storage timeout in seconds. Default: 120.
    pub storage_timeout_secs: u64,

    /// Remote OCR endpoint. `None` disables [`crate::ocr::HttpOcrClient`].
    pub ocr_endpoint: Option<String>,

    /// API key sent to the OCR endpoint.
    pub ocr_api_key: Option<String>,

    /// Per-call OCR timeout in seconds. Default: 180.
    pub ocr_timeout_secs: u64,

    /// Bounded OCR retry count, separate from the storage policy. Default: 2.
    pub ocr_max_retries: u32,

    /// Initial OCR retry delay in milliseconds. Default: 1000.
    pub ocr_backoff_ms: u64,

    /// Resolution assumed for raster sources when sizing PDF pages. Default: 200.
    ///
    /// A 1700 × 2200 px fax frame at 200 DPI becomes an 8.5 × 11 in page.
    pub image_dpi: u32,

    /// Rasterise PDF pages carrying form widgets before splitting. Default: true.
    pub flatten_forms: bool,

    /// DPI used when rasterising a form page. Default: 150.
    pub flatten_dpi: u32,

    /// Longest edge, in pixels, of a rasterised page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Directory holding the pdfium shared library. `None` binds the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Concurrent page uploads. Default: 4.
    pub upload_concurrency: usize,

    /// Actor recorded as `updated_by` / `validated_by` for automated steps.
    pub system_actor: String,

    /// Receives per-stage intake events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            storage_base_url: "http://127.0.0.1:10000/devstoreaccount1".to_string(),
            blob_prefix: None,
            default_container: "intake".to_string(),
            channel_containers: Vec::new(),
            source_container: None,
            target_container: "processed".to_string(),
            storage_token: None,
            storage_max_retries: 3,
            storage_backoff_ms: 500,
            storage_timeout_secs: 120,
            ocr_endpoint: None,
            ocr_api_key: None,
            ocr_timeout_secs: 180,
            ocr_max_retries: 2,
            ocr_backoff_ms: 1000,
            image_dpi: 200,
            flatten_forms: true,
            flatten_dpi: 150,
            max_rendered_pixels: 2000,
            pdfium_library_path: None,
            upload_concurrency: 4,
            system_actor: "system".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeConfig")
            .field("storage_base_url", &self.storage_base_url)
            .field("blob_prefix", &self.blob_prefix)
            .field("default_container", &self.default_container)
            .field("channel_containers", &self.channel_containers)
            .field("source_container", &self.source_container)
            .field("target_container", &self.target_container)
            .field("storage_token", &self.storage_token.as_ref().map(|_| "<redacted>"))
            .field("storage_max_retries", &self.storage_max_retries)
            .field("storage_backoff_ms", &self.storage_backoff_ms)
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_api_key", &self.ocr_api_key.as_ref().map(|_| "<redacted>"))
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("ocr_max_retries", &self.ocr_max_retries)
            .field("image_dpi", &self.image_dpi)
            .field("flatten_forms", &self.flatten_forms)
            .field("flatten_dpi", &self.flatten_dpi)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl IntakeConfig {
    /// Create a new builder for `IntakeConfig`.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `container` is the configured read-only source container.
    pub fn is_source_container(&self, container: &str) -> bool {
        self.source_container
            .as_deref()
            .map(|src| src.trim().eq_ignore_ascii_case(container.trim()))
            .unwrap_or(false)
    }
}

/// Builder for [`IntakeConfig`].
#[derive(Debug)]
pub struct IntakeConfigBuilder {
    config: IntakeConfig,
}

impl IntakeConfigBuilder {
    pub fn storage_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn blob_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.config.blob_prefix = sanitize_prefix(prefix.as_ref());
        self
    }

    pub fn default_container(mut self, name: impl Into<String>) -> Self {
        self.config.default_container = name.into();
        self
    }

    pub fn channel_container(mut self, name: impl Into<String>) -> Self {
        self.config.channel_containers.push(name.into());
        self
    }

    pub fn channel_containers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.channel_containers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn source_container(mut self, name: impl Into<String>) -> Self {
        self.config.source_container = Some(name.into());
        self
    }

    pub fn target_container(mut self, name: impl Into<String>) -> Self {
        self.config.target_container = name.into();
        self
    }

    pub fn storage_token(mut self, token: impl Into<String>) -> Self {
        self.config.storage_token = Some(token.into());
        self
    }

    pub fn storage_max_retries(mut self, n: u32) -> Self {
        self.config.storage_max_retries = n;
        self
    }

    pub fn storage_backoff_ms(mut self, ms: u64) -> Self {
        self.config.storage_backoff_ms = ms;
        self
    }

    pub fn storage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.storage_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = Some(url.into());
        self
    }

    pub fn ocr_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr_api_key = Some(key.into());
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_max_retries(mut self, n: u32) -> Self {
        self.config.ocr_max_retries = n;
        self
    }

    pub fn ocr_backoff_ms(mut self, ms: u64) -> Self {
        self.config.ocr_backoff_ms = ms;
        self
    }

    pub fn image_dpi(mut self, dpi: u32) -> Self {
        self.config.image_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn flatten_forms(mut self, v: bool) -> Self {
        self.config.flatten_forms = v;
        self
    }

    pub fn flatten_dpi(mut self, dpi: u32) -> Self {
        self.config.flatten_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn system_actor(mut self, actor: impl Into<String>) -> Self {
        self.config.system_actor = actor.into();
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IntakeConfig, IntakeError> {
        let c = &self.config;
        if !has_url_scheme(&c.storage_base_url) {
            return Err(IntakeError::InvalidConfig(
                "storage_base_url must be an absolute URL with a scheme".into(),
            ));
        }
        if c.default_container.trim().is_empty() || c.target_container.trim().is_empty() {
            return Err(IntakeError::InvalidConfig(
                "default_container and target_container must not be empty".into(),
            ));
        }
        if c.is_source_container(&c.target_container) {
            return Err(IntakeError::InvalidConfig(format!(
                "target_container '{}' is the read-only source container",
                c.target_container
            )));
        }
        if let Some(endpoint) = &c.ocr_endpoint {
            if !has_url_scheme(endpoint) {
                return Err(IntakeError::InvalidConfig(
                    "ocr_endpoint must be an absolute URL".into(),
                ));
            }
        }
        if c.upload_concurrency == 0 {
            return Err(IntakeError::InvalidConfig(
                "upload_concurrency must be ≥ 1".into(),
            ));
        }
        if !(72..=600).contains(&c.image_dpi) || !(72..=600).contains(&c.flatten_dpi) {
            return Err(IntakeError::InvalidConfig(format!(
                "DPI must be 72–600, got image={} flatten={}",
                c.image_dpi, c.flatten_dpi
            )));
        }
        Ok(self.config)
    }
}

/// True when `s` starts with `<scheme>://`.
pub(crate) fn has_url_scheme(s: &str) -> bool {
    match s.find("://") {
        Some(idx) if idx > 0 => {
            let scheme = &s[..idx];
            scheme
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic())
                .unwrap_or(false)
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

//! Error types for the case-intake library.
//!
//! Four error families reflect the distinct ways intake can fail:
//!
//! * [`IntakeError`]: **Fatal** for the current operation: the payload is
//!   malformed, a source has an unsupported format, storage gave up, or the
//!   document is already being processed. Returned as `Err(IntakeError)` from
//!   the [`crate::intake::IntakeService`] entry points.
//!
//! * [`PayloadError`]: every schema problem found in an inbound payload,
//!   collected in one pass rather than stopping at the first.
//!
//! * [`StorageError`]: a classified object-storage failure. The
//!   classification (`is_retryable`) is what drives the gateway retry loop.
//!
//! * [`OcrError`]: a remote OCR call failure; `RetriesExhausted` is terminal.
//!
//! Validation failures are *not* errors: they are returned as
//! [`crate::fields::validate::ValidationResult`] values.
//!
//! Messages name fields, stages and document ids only. Field values and file
//! contents never appear in a `Display` string.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the case-intake library.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Schema errors ─────────────────────────────────────────────────────
    /// The inbound payload is missing or has malformed required fields.
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    // ── Format errors ─────────────────────────────────────────────────────
    /// A source declared a MIME type the normaliser cannot convert.
    #[error("Unsupported MIME type '{mime_type}'")]
    UnsupportedMimeType { mime_type: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF source #{index} is corrupt: {detail}")]
    CorruptPdf { index: usize, detail: String },

    /// An image source could not be decoded.
    #[error("Image source #{index} could not be decoded: {detail}")]
    ImageDecode { index: usize, detail: String },

    /// Building an output PDF failed.
    #[error("Failed to assemble PDF: {0}")]
    PdfAssembly(String),

    /// pdfium returned an error while flattening a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set pdfium_library_path to the directory holding libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Object storage failed (after retries, for transient failures).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Remote OCR failed.
    #[error(transparent)]
    Ocr(#[from] OcrError),

    /// Local file-system failure on a scratch file.
    #[error("Local I/O failed for '{path}': {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Concurrency ───────────────────────────────────────────────────────
    /// The document is already being processed for this stage.
    #[error("Document '{document_id}' is already in progress for {stage}")]
    AlreadyInProgress {
        document_id: String,
        stage: crate::status::Stage,
    },

    // ── State errors ──────────────────────────────────────────────────────
    /// A snapshot transition was not legal in the current state.
    #[error(transparent)]
    Snapshot(#[from] crate::snapshot::SnapshotError),

    /// The persistence collaborator failed.
    #[error("Repository error: {0}")]
    Repository(String),

    /// The document does not exist in the repository.
    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IntakeError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

// ── Payload problems ─────────────────────────────────────────────────────

/// One schema problem in an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PayloadProblem {
    /// Dotted path of the offending field, e.g. `documents[2].mimeType`.
    pub field: String,
    /// Generic description; never contains the field's value.
    pub message: String,
}

impl PayloadProblem {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PayloadProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found while parsing a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct PayloadError {
    pub problems: Vec<PayloadProblem>,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid payload ({} problem", self.problems.len())?;
        if self.problems.len() != 1 {
            f.write_str("s")?;
        }
        f.write_str(")")?;
        for p in &self.problems {
            write!(f, "\n  - {p}")?;
        }
        Ok(())
    }
}

impl PayloadError {
    /// Names of the offending fields, in discovery order.
    pub fn fields(&self) -> Vec<&str> {
        self.problems.iter().map(|p| p.field.as_str()).collect()
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// A classified object-storage failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// HTTP 404. Permanent, never retried.
    #[error("Blob not found: {location}")]
    NotFound { location: String },

    /// Any other 4xx. Permanent, never retried.
    #[error("Storage rejected request for {location}: HTTP {status}")]
    Permanent { location: String, status: u16 },

    /// 5xx, timeouts and connection failures. Retried with backoff.
    #[error("Transient storage failure for {location}: {reason}")]
    Transient { location: String, reason: String },

    /// Every retry of a transient failure was used up.
    #[error("Storage operation '{operation}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Upload targeted the configured read-only source container.
    #[error("Refusing to write into read-only source container '{container}'")]
    ReadOnlyContainer { container: String },

    /// The location could not be mapped to this store.
    #[error("Unsupported blob location '{0}'")]
    UnsupportedLocation(String),
}

impl StorageError {
    /// Whether the gateway should try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    /// Classify an HTTP status code returned for `location`.
    pub fn from_status(location: impl Into<String>, status: u16) -> Self {
        let location = location.into();
        match status {
            404 => StorageError::NotFound { location },
            400..=499 => StorageError::Permanent { location, status },
            _ => StorageError::Transient {
                location,
                reason: format!("HTTP {status}"),
            },
        }
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// A remote OCR failure.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum OcrError {
    /// No OCR endpoint is configured.
    #[error("OCR endpoint is not configured")]
    NotConfigured,

    /// The service rejected the request (4xx). Not retried.
    #[error("OCR request rejected: HTTP {status}")]
    Rejected { status: u16 },

    /// One call exceeded the configured timeout.
    #[error("OCR call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// 5xx or connection failure on one attempt.
    #[error("OCR call failed: {detail}")]
    Transient { detail: String },

    /// The response body was not in the expected shape.
    #[error("OCR response malformed: {detail}")]
    MalformedResponse { detail: String },

    /// All bounded retries were used. Terminal for this request.
    #[error("OCR failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl OcrError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::Timeout { .. } | OcrError::Transient { .. })
    }
}

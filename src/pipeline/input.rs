//! Source resolution: MIME canonicalisation, magic-byte sniffing, and
//! download of each source document into the attempt's scratch directory.
//!
//! Sources land in a caller-owned `TempDir` rather than staying in memory so
//! that the merge stage can open them by path and the whole attempt's
//! footprint disappears with one directory.

use crate::error::IntakeError;
use crate::payload::SourceDocument;
use crate::progress::ProgressCallback;
use crate::storage::StorageGateway;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A source format the normaliser can convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Pdf,
    /// Possibly multi-frame.
    Tiff,
    Jpeg,
    Png,
    Text,
}

impl SourceFormat {
    /// Canonicalise a declared MIME type. Parameters (`; charset=…`) and
    /// case are ignored; common aliases are accepted.
    pub fn from_mime(mime_type: &str) -> Result<Self, IntakeError> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Ok(SourceFormat::Pdf),
            "image/tiff" | "image/tif" | "image/x-tiff" => Ok(SourceFormat::Tiff),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Ok(SourceFormat::Jpeg),
            "image/png" | "image/x-png" => Ok(SourceFormat::Png),
            "text/plain" => Ok(SourceFormat::Text),
            _ => Err(IntakeError::UnsupportedMimeType {
                mime_type: mime_type.trim().to_string(),
            }),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "application/pdf",
            SourceFormat::Tiff => "image/tiff",
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
            SourceFormat::Text => "text/plain",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Tiff => "tif",
            SourceFormat::Jpeg => "jpg",
            SourceFormat::Png => "png",
            SourceFormat::Text => "txt",
        }
    }

    /// Guess from a file extension (used by the CLI for local files).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "tif" | "tiff" => Some(SourceFormat::Tiff),
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "png" => Some(SourceFormat::Png),
            "txt" | "text" => Some(SourceFormat::Text),
            _ => None,
        }
    }

    /// Identify binary formats by their leading bytes. Text has no magic.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(SourceFormat::Pdf)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(SourceFormat::Tiff)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(SourceFormat::Png)
        } else {
            None
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Reconcile the declared MIME type with the content.
///
/// Content wins when both name a supported binary format and they
/// disagree. An unsupported declaration is rescued by sniffing; if sniffing
/// fails too, the declared type is reported.
pub fn resolve_format(declared: &str, bytes: &[u8], index: usize) -> Result<SourceFormat, IntakeError> {
    let sniffed = SourceFormat::sniff(bytes);
    match (SourceFormat::from_mime(declared), sniffed) {
        (Ok(d), Some(s)) if d != s => {
            warn!(
                "Source #{} declared {} but content is {}; using content",
                index, d, s
            );
            Ok(s)
        }
        (Ok(d), _) => Ok(d),
        (Err(_), Some(s)) => {
            warn!("Source #{} has unsupported declared type; content is {}", index, s);
            Ok(s)
        }
        (Err(e), None) => Err(e),
    }
}

/// A downloaded source on local disk.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub document: SourceDocument,
    pub path: PathBuf,
    pub format: SourceFormat,
    pub size_bytes: usize,
}

/// Download every source into `dir`, in payload order.
pub async fn fetch_sources(
    gateway: &StorageGateway,
    documents: &[SourceDocument],
    dir: &Path,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<FetchedSource>, IntakeError> {
    let total = documents.len();
    let mut fetched = Vec::with_capacity(total);

    for (i, doc) in documents.iter().enumerate() {
        let bytes = gateway.download_url(&doc.source_url).await?;
        let format = resolve_format(&doc.mime_type, &bytes, i)?;
        let path = dir.join(format!("{:03}_{}.{}", i + 1, stem(&doc.document_id), format.extension()));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| IntakeError::local_io(&path, e))?;
        debug!("Fetched source #{} ({} bytes, {})", i + 1, bytes.len(), format);
        if let Some(cb) = progress {
            cb.on_source_fetched(i + 1, total, bytes.len());
        }
        fetched.push(FetchedSource {
            document: doc.clone(),
            path,
            format,
            size_bytes: bytes.len(),
        });
    }

    info!("Fetched {} source document(s)", fetched.len());
    Ok(fetched)
}

/// File-system-safe stem from a document id.
fn stem(id: &str) -> String {
    let s: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if s.is_empty() {
        "source".to_string()
    } else {
        s
    }
}

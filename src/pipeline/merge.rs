//! Format normalisation and merge: an ordered list of local sources becomes
//! one consolidated PDF.
//!
//! | Source | Pages contributed |
//! |---|---|
//! | PDF | every page, copied unchanged |
//! | TIFF | one per frame |
//! | JPEG / PNG | one |
//! | text | one, word-wrapped |
//!
//! All MIME types are checked before any work starts, so an unsupported
//! type fails the merge without leaving anything behind. The output is
//! written to a temporary file beside the destination and only persisted
//! once complete; every error path drops (and so deletes) it.

use super::compose::{decode_text, load_pdf, PageSize, PdfBuilder};
use super::frames::decode_frames;
use super::input::{resolve_format, SourceFormat};
use super::sha256_hex;
use crate::error::IntakeError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// One file to merge.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub path: PathBuf,
    pub mime_type: String,
}

impl MergeInput {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Scan resolution assumed when sizing image pages.
    pub image_dpi: u32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { image_dpi: 200 }
    }
}

/// The merged PDF on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedArtifact {
    pub path: PathBuf,
    pub page_count: usize,
    /// Pages contributed by each input, in input order.
    pub contributions: Vec<usize>,
    pub size_bytes: u64,
    pub sha256: String,
    /// Lines of text sources that did not fit on their single page.
    pub dropped_text_lines: usize,
}

/// An in-memory merge result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPdf {
    pub bytes: Vec<u8>,
    /// Pages contributed by each input, in input order.
    pub contributions: Vec<usize>,
    /// Lines of text sources that did not fit on their single page.
    pub dropped_text_lines: usize,
}

/// Append one source to `builder`, returning how many pages it added.
pub(crate) fn append_source(
    builder: &mut PdfBuilder,
    bytes: &[u8],
    format: SourceFormat,
    index: usize,
    image_dpi: u32,
) -> Result<usize, IntakeError> {
    match format {
        SourceFormat::Pdf => {
            let doc = load_pdf(bytes, index)?;
            builder.import_all(&doc)
        }
        SourceFormat::Tiff | SourceFormat::Jpeg | SourceFormat::Png => {
            let frames = decode_frames(bytes, format, index)?;
            for frame in &frames {
                builder.push_image_page(frame, PageSize::for_image(frame, image_dpi))?;
            }
            Ok(frames.len())
        }
        SourceFormat::Text => {
            builder.push_text_page(&decode_text(bytes));
            Ok(1)
        }
    }
}

/// Merge `inputs` in memory.
///
/// A text source always becomes exactly one page: lines past the first
/// page are dropped, and the count is reported in
/// [`MergedPdf::dropped_text_lines`].
pub fn merge_to_bytes(inputs: &[MergeInput], options: &MergeOptions) -> Result<MergedPdf, IntakeError> {
    if inputs.is_empty() {
        return Err(IntakeError::PdfAssembly("no sources to merge".into()));
    }
    for input in inputs {
        SourceFormat::from_mime(&input.mime_type)?;
    }

    let mut builder = PdfBuilder::new();
    let mut contributions = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let bytes = std::fs::read(&input.path).map_err(|e| IntakeError::local_io(&input.path, e))?;
        let format = resolve_format(&input.mime_type, &bytes, i)?;
        let added = append_source(&mut builder, &bytes, format, i, options.image_dpi)?;
        debug!("Source #{} ({}) contributed {} page(s)", i + 1, format, added);
        contributions.push(added);
    }

    let expected: usize = contributions.iter().sum();
    if builder.page_count() != expected {
        return Err(IntakeError::PdfAssembly(format!(
            "page count mismatch: built {} but sources contributed {}",
            builder.page_count(),
            expected
        )));
    }
    if expected == 0 {
        return Err(IntakeError::PdfAssembly("sources contain no pages".into()));
    }

    let dropped_text_lines = builder.dropped_text_lines();
    if dropped_text_lines > 0 {
        warn!("{} line(s) of text did not fit and were dropped", dropped_text_lines);
    }
    Ok(MergedPdf {
        bytes: builder.finish()?,
        contributions,
        dropped_text_lines,
    })
}

/// Merge `inputs` into a PDF at `output`.
pub fn merge_to_pdf(inputs: &[MergeInput], output: &Path, options: &MergeOptions) -> Result<ConsolidatedArtifact, IntakeError> {
    let MergedPdf {
        bytes,
        contributions,
        dropped_text_lines,
    } = merge_to_bytes(inputs, options)?;

    let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IntakeError::local_io(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| IntakeError::local_io(tmp.path(), e))?;
    tmp.persist(output)
        .map_err(|e| IntakeError::local_io(output, e.error))?;

    let page_count = contributions.iter().sum();
    info!(
        "Merged {} source(s) into {} page(s) ({} bytes)",
        inputs.len(),
        page_count,
        bytes.len()
    );
    Ok(ConsolidatedArtifact {
        path: output.to_path_buf(),
        page_count,
        contributions,
        size_bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
        dropped_text_lines,
    })
}

/// Async wrapper: decoding and PDF assembly are CPU-bound.
pub async fn merge_sources(
    inputs: Vec<MergeInput>,
    output: PathBuf,
    options: MergeOptions,
) -> Result<ConsolidatedArtifact, IntakeError> {
    tokio::task::spawn_blocking(move || merge_to_pdf(&inputs, &output, &options))
        .await
        .map_err(|e| IntakeError::Internal(format!("Merge task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Document;

    #[test]
    fn unsupported_type_fails_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("a.txt");
        std::fs::write(&text, "hello").unwrap();
        let out = dir.path().join("out.pdf");
        let err = merge_to_pdf(
            &[
                MergeInput::new(&text, "text/plain"),
                MergeInput::new(&text, "application/vnd.ms-excel"),
            ],
            &out,
            &MergeOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("application/vnd.ms-excel"));
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            merge_to_bytes(&[], &MergeOptions::default()),
            Err(IntakeError::PdfAssembly(_))
        ));
    }

    #[test]
    fn text_sources_contribute_one_page_each() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "first note").unwrap();
        std::fs::write(&b, "second note\nwith two lines").unwrap();
        let out = dir.path().join("merged.pdf");
        let artifact = merge_to_pdf(
            &[MergeInput::new(&a, "text/plain"), MergeInput::new(&b, "text/plain")],
            &out,
            &MergeOptions::default(),
        )
        .unwrap();
        assert_eq!(artifact.contributions, vec![1, 1]);
        assert_eq!(artifact.page_count, 2);
        let doc = Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(artifact.dropped_text_lines, 0);
    }

    #[test]
    fn overflowing_text_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let long = dir.path().join("long.txt");
        std::fs::write(&long, "row\n".repeat(200)).unwrap();
        let merged = merge_to_bytes(&[MergeInput::new(&long, "text/plain")], &MergeOptions::default()).unwrap();
        assert_eq!(merged.contributions, vec![1]);
        assert!(merged.dropped_text_lines > 0);
        assert_eq!(Document::load_mem(&merged.bytes).unwrap().get_pages().len(), 1);
    }
}

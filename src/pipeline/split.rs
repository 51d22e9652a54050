//! Page splitting: one consolidated document → one PDF per visual page.
//!
//! Non-PDF input is normalised first, so a multi-frame TIFF handed straight
//! to the splitter yields one page per frame exactly as it would after a
//! merge. Pages that carry form widgets are flattened through a
//! [`PageRasterizer`] when one is available; otherwise they are copied as-is
//! with the form fields whose widgets sit on that page, and a warning is
//! logged.
//!
//! Each output is named `page_NNNN.pdf` and hashed over its exact bytes.

use super::compose::{load_pdf, page_has_form_widgets, ImportMap, PageSize, PdfBuilder};
use super::flatten::PageRasterizer;
use super::input::{resolve_format, SourceFormat};
use super::merge::append_source;
use super::sha256_hex;
use crate::error::IntakeError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content type recorded for every page artifact.
pub const PAGE_CONTENT_TYPE: &str = "pdf";

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Directory, relative to the target container, pages are stored under.
    pub relative_dir: String,
    pub image_dpi: u32,
    pub flatten_forms: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            relative_dir: String::new(),
            image_dpi: 200,
            flatten_forms: true,
        }
    }
}

/// One single-page PDF written to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifact {
    /// 1-based and contiguous.
    pub page_number: usize,
    pub file_name: String,
    /// Destination path inside the target container.
    pub storage_path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub local_path: PathBuf,
}

/// Persisted description of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub page_number: usize,
    pub file_name: String,
    pub relative_path: String,
    pub is_coversheet: bool,
    pub content_type: String,
    pub file_size_bytes: u64,
    pub sha256: String,
}

/// Persisted description of a split document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page_count: usize,
    pub pages: Vec<PageEntry>,
}

impl PageMetadata {
    pub fn from_artifacts(artifacts: &[PageArtifact]) -> Self {
        Self {
            page_count: artifacts.len(),
            pages: artifacts
                .iter()
                .map(|a| PageEntry {
                    page_number: a.page_number,
                    file_name: a.file_name.clone(),
                    relative_path: a.storage_path.clone(),
                    is_coversheet: false,
                    content_type: a.content_type.clone(),
                    file_size_bytes: a.size_bytes,
                    sha256: a.sha256.clone(),
                })
                .collect(),
        }
    }

    /// Flag `page_number` as the coversheet and clear any other flag.
    /// Returns `false` if no such page exists.
    pub fn mark_coversheet(&mut self, page_number: usize) -> bool {
        if !self.pages.iter().any(|p| p.page_number == page_number) {
            return false;
        }
        for page in &mut self.pages {
            page.is_coversheet = page.page_number == page_number;
        }
        true
    }

    pub fn coversheet(&self) -> Option<&PageEntry> {
        self.pages.iter().find(|p| p.is_coversheet)
    }
}

pub fn page_file_name(page_number: usize) -> String {
    format!("page_{page_number:04}.pdf")
}

fn storage_path(relative_dir: &str, file_name: &str) -> String {
    let dir = relative_dir.trim_matches('/');
    if dir.is_empty() {
        file_name.to_string()
    } else {
        format!("{dir}/{file_name}")
    }
}

/// Normalise any supported source to PDF bytes.
fn to_pdf_bytes(bytes: Vec<u8>, format: SourceFormat, image_dpi: u32) -> Result<Vec<u8>, IntakeError> {
    if format == SourceFormat::Pdf {
        return Ok(bytes);
    }
    let mut builder = PdfBuilder::new();
    append_source(&mut builder, &bytes, format, 0, image_dpi)?;
    builder.finish()
}

/// Split PDF bytes into one PDF per page, in page order.
pub fn split_pdf_bytes(
    pdf: &[u8],
    options: &SplitOptions,
    rasterizer: Option<&dyn PageRasterizer>,
) -> Result<Vec<Vec<u8>>, IntakeError> {
    let doc = load_pdf(pdf, 0)?;
    let pages: Vec<_> = doc.get_pages().into_values().collect();

    let mut flattened: HashMap<usize, DynamicImage> = HashMap::new();
    if options.flatten_forms {
        let with_widgets: Vec<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, id)| page_has_form_widgets(&doc, **id))
            .map(|(i, _)| i)
            .collect();
        if !with_widgets.is_empty() {
            match rasterizer {
                Some(r) => match r.rasterize_pages(pdf, &with_widgets) {
                    Ok(images) => flattened.extend(images),
                    Err(e) => warn!(
                        "Form flattening failed for {} page(s), copying unflattened: {}",
                        with_widgets.len(),
                        e
                    ),
                },
                None => warn!(
                    "{} page(s) carry form fields but no rasteriser is configured; copying unflattened",
                    with_widgets.len()
                ),
            }
        }
    }

    let mut out = Vec::with_capacity(pages.len());
    for (i, page_id) in pages.iter().enumerate() {
        let mut builder = PdfBuilder::new();
        match flattened.get(&i) {
            Some(image) => {
                builder.push_image_page(image, PageSize::of_page(&doc, *page_id))?;
                debug!("Page {} flattened", i + 1);
            }
            None => {
                let mut map = ImportMap::new();
                builder.import_page(&doc, *page_id, &mut map)?;
                builder.import_form(&doc, &mut map);
            }
        }
        out.push(builder.finish()?);
    }
    Ok(out)
}

/// Split the document at `input` into `out_dir`.
///
/// Files already written are removed if a later page fails.
pub fn split_to_dir(
    input: &Path,
    mime_type: &str,
    out_dir: &Path,
    options: &SplitOptions,
    rasterizer: Option<&dyn PageRasterizer>,
) -> Result<Vec<PageArtifact>, IntakeError> {
    let bytes = std::fs::read(input).map_err(|e| IntakeError::local_io(input, e))?;
    let format = resolve_format(mime_type, &bytes, 0)?;
    let pdf = to_pdf_bytes(bytes, format, options.image_dpi)?;
    let pages = split_pdf_bytes(&pdf, options, rasterizer)?;

    std::fs::create_dir_all(out_dir).map_err(|e| IntakeError::local_io(out_dir, e))?;

    let mut artifacts: Vec<PageArtifact> = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let page_number = i + 1;
        let file_name = page_file_name(page_number);
        let local_path = out_dir.join(&file_name);
        if let Err(e) = std::fs::write(&local_path, page) {
            for written in &artifacts {
                if let Err(rm) = std::fs::remove_file(&written.local_path) {
                    warn!("Could not remove {}: {}", written.local_path.display(), rm);
                }
            }
            return Err(IntakeError::local_io(&local_path, e));
        }
        artifacts.push(PageArtifact {
            page_number,
            storage_path: storage_path(&options.relative_dir, &file_name),
            file_name,
            content_type: PAGE_CONTENT_TYPE.to_string(),
            size_bytes: page.len() as u64,
            sha256: sha256_hex(page),
            local_path,
        });
    }

    info!("Split {} into {} page(s)", input.display(), artifacts.len());
    Ok(artifacts)
}

/// Async wrapper running the split on the blocking pool.
pub async fn split_document(
    input: PathBuf,
    mime_type: String,
    out_dir: PathBuf,
    options: SplitOptions,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
) -> Result<Vec<PageArtifact>, IntakeError> {
    tokio::task::spawn_blocking(move || {
        split_to_dir(&input, &mime_type, &out_dir, &options, rasterizer.as_deref())
    })
    .await
    .map_err(|e| IntakeError::Internal(format!("Split task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_page_pdf() -> Vec<u8> {
        let mut b = PdfBuilder::new();
        for text in ["alpha", "beta", "gamma"] {
            b.push_text_page(text);
        }
        b.finish().unwrap()
    }

    #[test]
    fn one_output_per_page_with_distinct_hashes() {
        let pages = split_pdf_bytes(&three_page_pdf(), &SplitOptions::default(), None).unwrap();
        assert_eq!(pages.len(), 3);
        let mut hashes: Vec<String> = pages.iter().map(|p| sha256_hex(p)).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn writes_named_pages_under_relative_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.pdf");
        std::fs::write(&src, three_page_pdf()).unwrap();
        let options = SplitOptions {
            relative_dir: "/D-77/pages/".into(),
            ..SplitOptions::default()
        };
        let out = split_to_dir(&src, "application/pdf", &dir.path().join("pages"), &options, None).unwrap();
        assert_eq!(out[0].storage_path, "D-77/pages/page_0001.pdf");
        assert_eq!(out[2].file_name, "page_0003.pdf");
        assert!(out.iter().all(|p| p.local_path.exists() && p.content_type == "pdf"));
    }

    #[test]
    fn coversheet_flag_is_exclusive() {
        let mut meta = PageMetadata::from_artifacts(&[]);
        assert!(!meta.mark_coversheet(1));
        meta.pages = (1..=3)
            .map(|n| PageEntry {
                page_number: n,
                file_name: page_file_name(n),
                relative_path: page_file_name(n),
                is_coversheet: false,
                content_type: "pdf".into(),
                file_size_bytes: 1,
                sha256: String::new(),
            })
            .collect();
        assert!(meta.mark_coversheet(2));
        assert!(meta.mark_coversheet(3));
        assert_eq!(meta.coversheet().map(|p| p.page_number), Some(3));
        assert_eq!(meta.pages.iter().filter(|p| p.is_coversheet).count(), 1);
    }
}

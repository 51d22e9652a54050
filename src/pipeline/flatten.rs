//! Form flattening: render pages carrying interactive widgets so their
//! field values become static pixels.
//!
//! ## Why rasterise?
//!
//! A widget's value lives in the document's AcroForm, not on the page.
//! Merge and split carry the AcroForm along, but a widget without an
//! appearance stream still depends on the viewer regenerating it, and many
//! do not. Rendering with form data on and embedding the bitmap at the
//! page's original size keeps what the reader saw.
//!
//! pdfium is bound per call: the library is not async-safe and callers
//! already run splitting inside `spawn_blocking`.

use crate::config::IntakeConfig;
use crate::error::IntakeError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Renders selected pages of a PDF to images.
pub trait PageRasterizer: Send + Sync {
    /// Returns `(page_index_0based, image)` for each requested index that
    /// exists in the document.
    fn rasterize_pages(&self, pdf_bytes: &[u8], page_indices: &[usize]) -> Result<Vec<(usize, DynamicImage)>, IntakeError>;
}

/// pdfium-backed [`PageRasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, dpi: u32, max_pixels: u32) -> Self {
        Self {
            library_path,
            dpi: dpi.max(1),
            max_pixels: max_pixels.max(1),
        }
    }

    pub fn from_config(config: &IntakeConfig) -> Self {
        Self::new(
            config.pdfium_library_path.clone(),
            config.flatten_dpi,
            config.max_rendered_pixels,
        )
    }

    /// Render width for a page `width_pt` points wide: `dpi`, capped so
    /// neither edge exceeds `max_pixels`.
    fn target_width(&self, width_pt: f32) -> i32 {
        let at_dpi = (width_pt * self.dpi as f32 / 72.0).round() as i64;
        at_dpi.clamp(1, self.max_pixels as i64) as i32
    }

    /// `library_path` may name the library file itself or the directory
    /// holding it; without one the system library is used.
    fn bind(&self) -> Result<Pdfium, IntakeError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_file() => Pdfium::bind_to_library(path),
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| IntakeError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize_pages(&self, pdf_bytes: &[u8], page_indices: &[usize]) -> Result<Vec<(usize, DynamicImage)>, IntakeError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| IntakeError::RasterisationFailed {
                page: 0,
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let mut out = Vec::with_capacity(page_indices.len());
        for &idx in page_indices.iter().filter(|&&i| i < total) {
            let page = pages
                .get(idx as u16)
                .map_err(|e| IntakeError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            let render_config = PdfRenderConfig::new()
                .set_target_width(self.target_width(page.width().value))
                .set_maximum_height(self.max_pixels as i32)
                .render_form_data(true);
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| IntakeError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;
            let image = bitmap.as_image();
            debug!(
                "Flattened page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            out.push((idx, image));
        }
        Ok(out)
    }
}

//! Pipeline stages that turn inbound files into per-page PDFs.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on local files with no storage or OCR service attached.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ frames ──▶ compose ──▶ merge ──▶ split (+ flatten)
//! (fetch)   (decode)   (lopdf)    (1 PDF)   (N PDFs)
//! ```
//!
//! 1. [`input`]: canonicalise MIME types and download sources to a
//!    scratch directory
//! 2. [`frames`]: decode TIFF / PNG / JPEG into owned per-frame images
//! 3. [`compose`]: build PDF pages from images, text, or existing pages
//! 4. [`merge`]: concatenate every source into one consolidated PDF;
//!    runs in `spawn_blocking`
//! 5. [`split`]: emit one hashed PDF per page, flattening form pages via
//!    [`flatten`] (pdfium) when available

pub mod compose;
pub mod flatten;
pub mod frames;
pub mod input;
pub mod merge;
pub mod split;

use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

//! # case-intake
//!
//! Intake pipeline for inbound case documents: parse a submission payload,
//! normalise every attachment to PDF, split the result into hashed per-page
//! PDFs, then clean, validate and audit the fields an OCR service extracts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! payload (JSON)
//!  │
//!  ├─ 1. Parse     both schema generations, every problem reported at once
//!  ├─ 2. Fetch     source documents via the storage gateway (retry/backoff)
//!  ├─ 3. Merge     PDF / TIFF frames / JPEG / PNG / text → one PDF
//!  ├─ 4. Split     one PDF per page, forms flattened, sha256 each
//!  ├─ 5. OCR       remote engine, bounded retry
//!  ├─ 6. Snapshot  baseline / working / suggested + append-only audit log
//!  ├─ 7. Fix       phone, date, diagnosis, address clean-up (idempotent)
//!  ├─ 8. Validate  grouped field errors, never short-circuits
//!  └─ 9. Sync      non-destructive merge into the canonical record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use case_intake::{IntakeConfig, IntakeService, MemoryRepository, MemoryObjectStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IntakeConfig::builder()
//!         .source_container("inbound")
//!         .target_container("processed")
//!         .build()?;
//!     let store = Arc::new(MemoryObjectStore::default());
//!     let service = IntakeService::new(config, store, Arc::new(MemoryRepository::new()));
//!
//!     let payload = serde_json::json!({
//!         "decision_tracking_id": "DT-1",
//!         "submission_metadata": {},
//!         "documents": []
//!     });
//!     let output = service.ingest_package(&payload).await?;
//!     println!("{} page(s)", output.pages.page_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `intake` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! case-intake = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod blob_path;
pub mod canonical;
pub mod config;
pub mod error;
pub mod fields;
pub mod intake;
pub mod ocr;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub mod repository;
pub mod snapshot;
pub mod status;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use blob_path::BlobPathResolver;
pub use canonical::{sync_canonical, CanonicalRecord, SyncOutcome};
pub use config::{IntakeConfig, IntakeConfigBuilder};
pub use error::{IntakeError, OcrError, PayloadError, PayloadProblem, StorageError};
pub use fields::autofix::{auto_fix, AutoFixReport};
pub use fields::validate::{validate, ValidationResult};
pub use fields::{FieldMap, FieldRecord, FieldSource, FieldType, PartType};
pub use intake::{EditOutcome, IntakeOutput, IntakeService, OcrMode, OcrOutcome, SettleOutcome};
pub use ocr::{HttpOcrClient, OcrEngine, OcrExtraction, OcrRequest};
pub use payload::{parse_payload, IntakePayload, SourceDocument};
pub use pipeline::merge::{merge_to_pdf, ConsolidatedArtifact, MergeInput, MergeOptions, MergedPdf};
pub use pipeline::split::{split_to_dir, PageArtifact, PageMetadata, SplitOptions};
pub use progress::{IntakeProgressCallback, NoopProgressCallback, ProgressCallback};
pub use repository::{DocumentRepository, MemoryRepository};
pub use snapshot::{DocumentExtraction, PromoteMode};
pub use status::{DocumentStatus, ProcessingStatus, Stage};
pub use storage::{BlobLocation, HttpObjectStore, MemoryObjectStore, ObjectStore, StorageGateway};

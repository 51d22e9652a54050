//! End-to-end intake operations.
//!
//! [`IntakeService`] owns no per-document state: each call loads what it
//! needs from the [`DocumentRepository`], does its work, and writes back.
//! The two long stages (`ingest_package` and `run_ocr`) take the document's
//! status guard first and release it on every exit path.
//!
//! A package's `decision_tracking_id` is the id of its consolidated
//! document and of its canonical record.

use crate::canonical::{sync_canonical, CanonicalRecord, SyncOutcome};
use crate::config::IntakeConfig;
use crate::error::{IntakeError, OcrError};
use crate::fields::validate::{validate, ValidationResult};
use crate::ocr::{OcrEngine, OcrRequest};
use crate::payload::{parse_payload, IntakePayload, UrlContext};
use crate::pipeline::flatten::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::input::fetch_sources;
use crate::pipeline::merge::{merge_sources, ConsolidatedArtifact, MergeInput, MergeOptions};
use crate::pipeline::split::{split_document, PageArtifact, PageMetadata, SplitOptions};
use crate::repository::{DocumentRepository, IntakeRecord};
use crate::snapshot::{DocumentExtraction, PromoteMode};
use crate::status::Stage;
use crate::storage::{BlobLocation, ObjectStore, StorageGateway};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the consolidated PDF inside the document's folder.
pub const CONSOLIDATED_FILE_NAME: &str = "consolidated.pdf";

/// Which snapshot a fresh OCR result lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// First extraction: becomes baseline and working.
    Initial,
    /// Re-extraction: staged as the suggestion, awaiting promotion.
    Stage,
}

/// Result of [`IntakeService::ingest_package`].
#[derive(Debug, Clone)]
pub struct IntakeOutput {
    pub document_id: String,
    pub payload: IntakePayload,
    /// `None` when the package had no documents.
    pub consolidated: Option<BlobLocation>,
    pub pages: PageMetadata,
    pub duration_ms: u64,
}

/// What auto-fix, validation and canonical sync did after a mutation.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub auto_fixed: Vec<String>,
    pub validation: ValidationResult,
    pub canonical: SyncOutcome,
}

/// Result of [`IntakeService::run_ocr`].
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub document_id: String,
    pub mode: OcrMode,
    pub field_count: usize,
    pub coversheet_page: Option<u32>,
    /// Present for [`OcrMode::Initial`]; staging leaves working untouched.
    pub settled: Option<SettleOutcome>,
}

/// Result of a user-driven change to working fields.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub changed_fields: Vec<String>,
    pub settled: SettleOutcome,
}

pub struct IntakeService {
    config: IntakeConfig,
    gateway: StorageGateway,
    repository: Arc<dyn DocumentRepository>,
    ocr: Option<Arc<dyn OcrEngine>>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
}

impl std::fmt::Debug for IntakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeService")
            .field("config", &self.config)
            .field("gateway", &self.gateway)
            .field("ocr", &self.ocr.is_some())
            .field("rasterizer", &self.rasterizer.is_some())
            .finish()
    }
}

impl IntakeService {
    /// Build a service. When `flatten_forms` is on, a pdfium rasteriser is
    /// installed; replace it with [`with_rasterizer`](Self::with_rasterizer).
    pub fn new(config: IntakeConfig, store: Arc<dyn ObjectStore>, repository: Arc<dyn DocumentRepository>) -> Self {
        let gateway = StorageGateway::new(store, &config);
        let rasterizer: Option<Arc<dyn PageRasterizer>> = config
            .flatten_forms
            .then(|| Arc::new(PdfiumRasterizer::from_config(&config)) as Arc<dyn PageRasterizer>);
        Self {
            config,
            gateway,
            repository,
            ocr: None,
            rasterizer,
        }
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    /// Parse a payload without fetching anything.
    pub fn parse(&self, raw: &Value) -> Result<IntakePayload, IntakeError> {
        let ctx = UrlContext {
            config: &self.config,
            gateway: &self.gateway,
        };
        Ok(parse_payload(raw, &ctx)?)
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    /// Parse, fetch, merge, split and store one inbound package.
    ///
    /// # Errors
    /// * [`IntakeError::InvalidPayload`] listing every schema problem
    /// * [`IntakeError::AlreadyInProgress`] if the split stage is running
    /// * format, storage and local I/O errors from the pipeline stages
    pub async fn ingest_package(&self, raw: &Value) -> Result<IntakeOutput, IntakeError> {
        let start = Instant::now();
        let payload = self.parse(raw)?;
        let document_id = payload.decision_tracking_id.clone();
        info!(
            "Ingesting {} ({} source document(s), {:?} schema)",
            document_id,
            payload.documents.len(),
            payload.schema
        );

        self.repository.try_begin(&document_id, Stage::Split).await?;
        let result = self.ingest_in_scratch(&payload).await;
        self.release(&document_id, Stage::Split, result.is_ok()).await?;
        let (consolidated, pages) = result?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Ingest of {} complete: {} page(s) in {}ms",
            document_id, pages.page_count, duration_ms
        );
        Ok(IntakeOutput {
            document_id,
            payload,
            consolidated,
            pages,
            duration_ms,
        })
    }

    /// Run the ingest inside a scratch directory removed on every exit.
    async fn ingest_in_scratch(
        &self,
        payload: &IntakePayload,
    ) -> Result<(Option<BlobLocation>, PageMetadata), IntakeError> {
        let scratch = tempfile::Builder::new()
            .prefix("case-intake-")
            .tempdir()
            .map_err(|e| IntakeError::local_io(std::env::temp_dir(), e))?;
        let result = self.ingest_stages(payload, scratch.path()).await;
        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!("Could not remove scratch dir {}: {}", scratch_path.display(), e);
        }
        result
    }

    async fn ingest_stages(
        &self,
        payload: &IntakePayload,
        scratch: &Path,
    ) -> Result<(Option<BlobLocation>, PageMetadata), IntakeError> {
        let document_id = payload.decision_tracking_id.as_str();
        let progress = self.config.progress_callback.as_ref();

        // ── Step 1: Canonical record exists from intake on ──────────────
        if self.repository.load_canonical(document_id).await?.is_none() {
            self.repository
                .save_canonical(&CanonicalRecord::new(document_id))
                .await?;
        }

        if let Some(cb) = progress {
            cb.on_intake_start(document_id, payload.documents.len());
        }

        if payload.documents.is_empty() {
            info!("{} has no attachments; nothing to merge", document_id);
            let pages = PageMetadata::default();
            self.persist_intake(payload, None, &pages).await?;
            if let Some(cb) = progress {
                cb.on_intake_complete(document_id, 0);
            }
            return Ok((None, pages));
        }

        // ── Step 2: Fetch sources ───────────────────────────────────────
        let sources_dir = scratch.join("sources");
        tokio::fs::create_dir_all(&sources_dir)
            .await
            .map_err(|e| IntakeError::local_io(&sources_dir, e))?;
        let fetched = fetch_sources(&self.gateway, &payload.documents, &sources_dir, progress).await?;

        // ── Step 3: Merge ───────────────────────────────────────────────
        let inputs = fetched
            .iter()
            .map(|f| MergeInput::new(&f.path, f.format.mime_type()))
            .collect();
        let merged_path = scratch.join(CONSOLIDATED_FILE_NAME);
        let artifact = merge_sources(
            inputs,
            merged_path,
            MergeOptions {
                image_dpi: self.config.image_dpi,
            },
        )
        .await?;
        if let Some(cb) = progress {
            cb.on_merge_complete(artifact.page_count);
        }

        // ── Step 4: Store consolidated PDF ──────────────────────────────
        let consolidated = self.upload_consolidated(document_id, &artifact).await?;

        // ── Step 5: Split ───────────────────────────────────────────────
        let pages = split_document(
            artifact.path.clone(),
            "application/pdf".to_string(),
            scratch.join("pages"),
            SplitOptions {
                relative_dir: format!("{document_id}/pages"),
                image_dpi: self.config.image_dpi,
                flatten_forms: self.config.flatten_forms,
            },
            self.rasterizer.clone(),
        )
        .await?;
        if pages.len() != artifact.page_count {
            return Err(IntakeError::PdfAssembly(format!(
                "split produced {} page(s) from a {}-page document",
                pages.len(),
                artifact.page_count
            )));
        }

        // ── Step 6: Store pages ─────────────────────────────────────────
        self.upload_pages(&pages).await?;

        // ── Step 7: Persist metadata ────────────────────────────────────
        let metadata = PageMetadata::from_artifacts(&pages);
        self.persist_intake(payload, Some(consolidated.clone()), &metadata)
            .await?;

        if let Some(cb) = progress {
            cb.on_intake_complete(document_id, metadata.page_count);
        }
        Ok((Some(consolidated), metadata))
    }

    async fn upload_consolidated(
        &self,
        document_id: &str,
        artifact: &ConsolidatedArtifact,
    ) -> Result<BlobLocation, IntakeError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| IntakeError::local_io(&artifact.path, e))?;
        let location = self
            .gateway
            .upload(
                &self.config.target_container,
                &format!("{document_id}/{CONSOLIDATED_FILE_NAME}"),
                &bytes,
                "application/pdf",
            )
            .await?;
        debug!("Consolidated PDF for {} stored at {}", document_id, location);
        Ok(location)
    }

    async fn upload_pages(&self, pages: &[PageArtifact]) -> Result<(), IntakeError> {
        let total = pages.len();
        let progress = self.config.progress_callback.clone();
        stream::iter(pages.iter().map(|page| {
            let progress = progress.clone();
            async move {
                let bytes = tokio::fs::read(&page.local_path)
                    .await
                    .map_err(|e| IntakeError::local_io(&page.local_path, e))?;
                self.gateway
                    .upload(
                        &self.config.target_container,
                        &page.storage_path,
                        &bytes,
                        "application/pdf",
                    )
                    .await?;
                if let Some(cb) = progress {
                    cb.on_page_stored(page.page_number, total);
                }
                Ok::<(), IntakeError>(())
            }
        }))
        .buffer_unordered(self.config.upload_concurrency)
        .try_collect::<Vec<()>>()
        .await?;
        Ok(())
    }

    async fn persist_intake(
        &self,
        payload: &IntakePayload,
        consolidated: Option<BlobLocation>,
        pages: &PageMetadata,
    ) -> Result<(), IntakeError> {
        let document_id = &payload.decision_tracking_id;
        self.repository.save_page_metadata(document_id, pages).await?;
        self.repository
            .save_intake(&IntakeRecord {
                document_id: document_id.clone(),
                consolidated,
                page_count: pages.page_count,
                sources: payload.documents.clone(),
            })
            .await
    }

    /// Release a stage guard. A release failure only surfaces when the
    /// guarded work itself succeeded.
    async fn release(&self, document_id: &str, stage: Stage, succeeded: bool) -> Result<(), IntakeError> {
        match self.repository.finish(document_id, stage, succeeded).await {
            Ok(()) => Ok(()),
            Err(e) if succeeded => Err(e),
            Err(e) => {
                warn!("Could not mark {} {} as failed: {}", document_id, stage, e);
                Ok(())
            }
        }
    }

    // ── OCR ──────────────────────────────────────────────────────────────

    /// Send the consolidated PDF to the OCR engine and record the result.
    ///
    /// # Errors
    /// * [`IntakeError::AlreadyInProgress`] if OCR is already running
    /// * [`IntakeError::DocumentNotFound`] if the document was never ingested
    ///   or has no consolidated PDF
    /// * [`IntakeError::Ocr`] when no engine is configured or the call fails
    /// * [`IntakeError::Snapshot`] for `Initial` on a document with a baseline
    pub async fn run_ocr(&self, document_id: &str, mode: OcrMode) -> Result<OcrOutcome, IntakeError> {
        let engine = self.ocr.clone().ok_or(IntakeError::Ocr(OcrError::NotConfigured))?;
        self.repository.try_begin(document_id, Stage::Ocr).await?;
        let result = self.ocr_stages(engine.as_ref(), document_id, mode).await;
        self.release(document_id, Stage::Ocr, result.is_ok()).await?;
        result
    }

    async fn ocr_stages(
        &self,
        engine: &dyn OcrEngine,
        document_id: &str,
        mode: OcrMode,
    ) -> Result<OcrOutcome, IntakeError> {
        let record = self
            .repository
            .load_intake(document_id)
            .await?
            .ok_or_else(|| IntakeError::DocumentNotFound(document_id.to_string()))?;
        let location = record
            .consolidated
            .ok_or_else(|| IntakeError::DocumentNotFound(document_id.to_string()))?;
        let pdf = self.gateway.download(&location.container, &location.path).await?;

        let result = engine
            .extract(OcrRequest {
                document_id,
                file_name: CONSOLIDATED_FILE_NAME,
                pdf_bytes: &pdf,
            })
            .await?;
        info!(
            "OCR returned {} field(s) for {}",
            result.fields.len(),
            document_id
        );

        let mut extraction = self
            .repository
            .load_extraction(document_id)
            .await?
            .unwrap_or_else(|| DocumentExtraction::new(document_id));
        let actor = self.config.system_actor.clone();

        let settled = match mode {
            OcrMode::Initial => {
                extraction.apply_initial_ocr(&result, &actor)?;
                Some(self.settle(&mut extraction, &actor).await?)
            }
            OcrMode::Stage => {
                extraction.stage_suggested(&result, &actor);
                None
            }
        };

        if let Some(page) = extraction.coversheet_page() {
            self.mark_coversheet(document_id, page).await;
        }
        self.repository.save_extraction(&extraction).await?;

        Ok(OcrOutcome {
            document_id: document_id.to_string(),
            mode,
            field_count: result.fields.len(),
            coversheet_page: extraction.coversheet_page(),
            settled,
        })
    }

    /// Flag the coversheet in stored page metadata. Failures are logged:
    /// the flag is a display hint and does not block OCR.
    async fn mark_coversheet(&self, document_id: &str, page: u32) {
        let outcome = async {
            let Some(mut metadata) = self.repository.load_page_metadata(document_id).await? else {
                return Ok(false);
            };
            if !metadata.mark_coversheet(page as usize) {
                return Ok(false);
            }
            self.repository.save_page_metadata(document_id, &metadata).await?;
            Ok::<bool, IntakeError>(true)
        }
        .await;
        match outcome {
            Ok(true) => debug!("Marked page {} of {} as coversheet", page, document_id),
            Ok(false) => warn!("Coversheet page {} not found for {}", page, document_id),
            Err(e) => warn!("Could not mark coversheet for {}: {}", document_id, e),
        }
    }

    // ── Field corrections ────────────────────────────────────────────────

    /// Write user edits into working, then auto-fix, validate and sync.
    pub async fn save_manual_edits(
        &self,
        document_id: &str,
        edits: &BTreeMap<String, String>,
        updated_by: &str,
        note: Option<String>,
    ) -> Result<EditOutcome, IntakeError> {
        let mut extraction = self
            .repository
            .load_extraction(document_id)
            .await?
            .unwrap_or_else(|| DocumentExtraction::new(document_id));
        let changed_fields = extraction.manual_edit(edits, updated_by, note);
        let settled = self.settle(&mut extraction, updated_by).await?;
        self.repository.save_extraction(&extraction).await?;
        Ok(EditOutcome {
            changed_fields,
            settled,
        })
    }

    /// Fold the staged suggestion into working using `mode`.
    pub async fn promote_suggested(
        &self,
        document_id: &str,
        mode: PromoteMode,
        updated_by: &str,
    ) -> Result<EditOutcome, IntakeError> {
        let mut extraction = self.require_extraction(document_id).await?;
        let changed_fields = extraction.promote_suggested(mode, updated_by)?;
        let settled = self.settle(&mut extraction, updated_by).await?;
        self.repository.save_extraction(&extraction).await?;
        Ok(EditOutcome {
            changed_fields,
            settled,
        })
    }

    /// Re-run auto-fix, validation and canonical sync on working.
    pub async fn revalidate(&self, document_id: &str, validated_by: &str) -> Result<SettleOutcome, IntakeError> {
        let mut extraction = self.require_extraction(document_id).await?;
        let settled = self.settle(&mut extraction, validated_by).await?;
        self.repository.save_extraction(&extraction).await?;
        Ok(settled)
    }

    async fn require_extraction(&self, document_id: &str) -> Result<DocumentExtraction, IntakeError> {
        self.repository
            .load_extraction(document_id)
            .await?
            .ok_or_else(|| IntakeError::DocumentNotFound(document_id.to_string()))
    }

    /// Auto-fix working, validate it, record the result, and sync the
    /// canonical record. The caller persists `extraction`.
    async fn settle(&self, extraction: &mut DocumentExtraction, by: &str) -> Result<SettleOutcome, IntakeError> {
        let report = extraction.apply_auto_fix(by)?;
        let fields = extraction.working_fields();

        let mut validation = validate(&fields, extraction.effective_part_type());
        validation.auto_fix_applied.extend(report.applied.clone());
        let validation = validation.stamped(by);
        extraction.record_validation(validation.clone());
        if validation.has_errors {
            debug!(
                "{} has {} validation error(s)",
                extraction.document_id(),
                validation.error_count()
            );
        }

        let case_id = extraction.document_id().to_string();
        let mut canonical = self
            .repository
            .load_canonical(&case_id)
            .await?
            .unwrap_or_else(|| CanonicalRecord::new(&case_id));
        let sync = sync_canonical(&mut canonical, &fields);
        if sync.changed() {
            self.repository.save_canonical(&canonical).await?;
        }

        Ok(SettleOutcome {
            auto_fixed: report.changed_fields().map(str::to_string).collect(),
            validation,
            canonical: sync,
        })
    }
}

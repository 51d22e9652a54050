//! Persistence seam for per-document state.
//!
//! The service never holds document state between calls; everything it
//! needs lives behind [`DocumentRepository`]. [`MemoryRepository`] is the
//! in-process implementation used by the CLI and tests.

use crate::canonical::CanonicalRecord;
use crate::error::IntakeError;
use crate::payload::SourceDocument;
use crate::pipeline::split::PageMetadata;
use crate::snapshot::DocumentExtraction;
use crate::status::{DocumentStatus, ProcessingStatus, Stage};
use crate::storage::BlobLocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Where a document's consolidated PDF landed, and what it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub document_id: String,
    pub consolidated: Option<BlobLocation>,
    pub page_count: usize,
    pub sources: Vec<SourceDocument>,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Atomically move `stage` to `IN_PROGRESS`.
    ///
    /// Fails with [`IntakeError::AlreadyInProgress`] when another attempt
    /// holds the stage; the caller must not queue or proceed.
    async fn try_begin(&self, document_id: &str, stage: Stage) -> Result<(), IntakeError>;

    async fn finish(&self, document_id: &str, stage: Stage, succeeded: bool) -> Result<(), IntakeError>;

    async fn status(&self, document_id: &str) -> Result<DocumentStatus, IntakeError>;

    async fn save_intake(&self, record: &IntakeRecord) -> Result<(), IntakeError>;

    async fn load_intake(&self, document_id: &str) -> Result<Option<IntakeRecord>, IntakeError>;

    async fn save_page_metadata(&self, document_id: &str, metadata: &PageMetadata) -> Result<(), IntakeError>;

    async fn load_page_metadata(&self, document_id: &str) -> Result<Option<PageMetadata>, IntakeError>;

    async fn save_extraction(&self, extraction: &DocumentExtraction) -> Result<(), IntakeError>;

    async fn load_extraction(&self, document_id: &str) -> Result<Option<DocumentExtraction>, IntakeError>;

    async fn save_canonical(&self, record: &CanonicalRecord) -> Result<(), IntakeError>;

    async fn load_canonical(&self, case_id: &str) -> Result<Option<CanonicalRecord>, IntakeError>;
}

#[derive(Debug, Default)]
struct DocumentEntry {
    status: DocumentStatus,
    intake: Option<IntakeRecord>,
    pages: Option<PageMetadata>,
    extraction: Option<DocumentExtraction>,
}

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<String, DocumentEntry>,
    canonical: HashMap<String, CanonicalRecord>,
}

/// `HashMap`-backed [`DocumentRepository`]. The status check-and-set runs
/// under one lock, so concurrent `try_begin` calls see each other.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, IntakeError> {
        self.tables
            .lock()
            .map_err(|_| IntakeError::Repository("repository lock poisoned".into()))
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    async fn try_begin(&self, document_id: &str, stage: Stage) -> Result<(), IntakeError> {
        let mut tables = self.lock()?;
        let entry = tables.documents.entry(document_id.to_string()).or_default();
        if entry.status.try_begin(stage) {
            Ok(())
        } else {
            Err(IntakeError::AlreadyInProgress {
                document_id: document_id.to_string(),
                stage,
            })
        }
    }

    async fn finish(&self, document_id: &str, stage: Stage, succeeded: bool) -> Result<(), IntakeError> {
        let mut tables = self.lock()?;
        let entry = tables.documents.entry(document_id.to_string()).or_default();
        entry.status.finish(stage, succeeded);
        Ok(())
    }

    async fn status(&self, document_id: &str) -> Result<DocumentStatus, IntakeError> {
        Ok(self
            .lock()?
            .documents
            .get(document_id)
            .map(|e| e.status)
            .unwrap_or(DocumentStatus {
                split_status: ProcessingStatus::NotStarted,
                ocr_status: ProcessingStatus::NotStarted,
            }))
    }

    async fn save_intake(&self, record: &IntakeRecord) -> Result<(), IntakeError> {
        let mut tables = self.lock()?;
        tables
            .documents
            .entry(record.document_id.clone())
            .or_default()
            .intake = Some(record.clone());
        Ok(())
    }

    async fn load_intake(&self, document_id: &str) -> Result<Option<IntakeRecord>, IntakeError> {
        Ok(self
            .lock()?
            .documents
            .get(document_id)
            .and_then(|e| e.intake.clone()))
    }

    async fn save_page_metadata(&self, document_id: &str, metadata: &PageMetadata) -> Result<(), IntakeError> {
        let mut tables = self.lock()?;
        tables.documents.entry(document_id.to_string()).or_default().pages = Some(metadata.clone());
        Ok(())
    }

    async fn load_page_metadata(&self, document_id: &str) -> Result<Option<PageMetadata>, IntakeError> {
        Ok(self
            .lock()?
            .documents
            .get(document_id)
            .and_then(|e| e.pages.clone()))
    }

    async fn save_extraction(&self, extraction: &DocumentExtraction) -> Result<(), IntakeError> {
        let mut tables = self.lock()?;
        tables
            .documents
            .entry(extraction.document_id().to_string())
            .or_default()
            .extraction = Some(extraction.clone());
        Ok(())
    }

    async fn load_extraction(&self, document_id: &str) -> Result<Option<DocumentExtraction>, IntakeError> {
        Ok(self
            .lock()?
            .documents
            .get(document_id)
            .and_then(|e| e.extraction.clone()))
    }

    async fn save_canonical(&self, record: &CanonicalRecord) -> Result<(), IntakeError> {
        self.lock()?
            .canonical
            .insert(record.case_id.clone(), record.clone());
        Ok(())
    }

    async fn load_canonical(&self, case_id: &str) -> Result<Option<CanonicalRecord>, IntakeError> {
        Ok(self.lock()?.canonical.get(case_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_begin_admits_one() {
        let repo = Arc::new(MemoryRepository::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.try_begin("D1", Stage::Ocr).await.is_ok()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(
            repo.status("D1").await.unwrap().ocr_status,
            ProcessingStatus::InProgress
        );
    }

    #[tokio::test]
    async fn rejection_names_stage() {
        let repo = MemoryRepository::new();
        repo.try_begin("D1", Stage::Split).await.unwrap();
        let err = repo.try_begin("D1", Stage::Split).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Document 'D1' is already in progress for split"
        );
        repo.finish("D1", Stage::Split, true).await.unwrap();
        repo.try_begin("D1", Stage::Split).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_document_is_not_started() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.status("nope").await.unwrap(), DocumentStatus::default());
        assert!(repo.load_extraction("nope").await.unwrap().is_none());
    }
}

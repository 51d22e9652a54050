//! Per-document extraction state: three snapshots and an append-only audit log.
//!
//! * `baseline`: the first OCR result. Only a full-overwrite promotion of a
//!   fresh OCR result may replace it; manual edits never do.
//! * `working`: current truth. Every downstream read should use this one.
//! * `suggested`: a staged re-OCR result awaiting promotion.
//!
//! Each transition that changes `working` appends exactly one
//! [`AuditEntry`]. Transitions that would leave `working` unchanged append
//! nothing.

use crate::fields::autofix::{auto_fix, normalized_value, AutoFixReport};
use crate::fields::validate::ValidationResult;
use crate::fields::{names, FieldClass, FieldMap, FieldRecord, FieldSource, FieldType, PartType};
use crate::ocr::OcrExtraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Illegal snapshot transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Document '{document_id}' already has a baseline extraction")]
    BaselineAlreadySet { document_id: String },

    #[error("Document '{document_id}' has no extraction yet")]
    NotInitialized { document_id: String },

    #[error("Document '{document_id}' has no suggested extraction to promote")]
    NoSuggestion { document_id: String },
}

/// One versioned set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSnapshot {
    pub fields: FieldMap,
    /// The OCR service response this snapshot came from, minus `fields`.
    #[serde(default)]
    pub raw: Value,
    pub source: FieldSource,
    pub last_updated_at: DateTime<Utc>,
    pub last_updated_by: String,
}

impl ExtractionSnapshot {
    fn from_ocr(result: &OcrExtraction, source: FieldSource, by: &str) -> Self {
        let fields = result
            .fields
            .iter()
            .map(|(k, v)| {
                let mut rec = v.clone();
                rec.source = source;
                (k.clone(), rec)
            })
            .collect();
        Self {
            fields,
            raw: result.raw.clone(),
            source,
            last_updated_at: Utc::now(),
            last_updated_by: by.to_string(),
        }
    }

    fn touch(&mut self, by: &str) {
        self.last_updated_at = Utc::now();
        self.last_updated_by = by.to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    InitialOcr,
    ManualSave,
    OcrApplied,
    CoversheetReocrMerge,
    AutoFix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "type")]
    pub entry_type: AuditType,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub changed_fields: BTreeMap<String, FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Append-only, chronologically ordered list of [`AuditEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    fn append(&mut self, mut entry: AuditEntry) {
        // Wall clocks can step backwards; the log order must not.
        if let Some(last) = self.entries.last() {
            if entry.updated_at < last.updated_at {
                entry.updated_at = last.updated_at;
            }
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub result: ValidationResult,
    pub active: bool,
}

/// Validation history. Only the newest record is active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationLog {
    records: Vec<ValidationRecord>,
}

impl ValidationLog {
    pub fn record(&mut self, result: ValidationResult) {
        for r in &mut self.records {
            r.active = false;
        }
        self.records.push(ValidationRecord {
            result,
            active: true,
        });
    }

    pub fn active(&self) -> Option<&ValidationResult> {
        self.records.iter().rev().find(|r| r.active).map(|r| &r.result)
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }
}

/// How a staged suggestion is folded into the working snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoteMode {
    /// Replace both working and baseline with the suggestion.
    FullOverwrite,
    /// Fill only fields that are empty in working; baseline untouched.
    FillEmpty,
}

/// Everything extracted for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtraction {
    document_id: String,
    baseline: Option<ExtractionSnapshot>,
    working: Option<ExtractionSnapshot>,
    suggested: Option<ExtractionSnapshot>,
    audit_log: AuditLog,
    validations: ValidationLog,
    part_type: PartType,
    coversheet_page: Option<u32>,
}

impl DocumentExtraction {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            baseline: None,
            working: None,
            suggested: None,
            audit_log: AuditLog::default(),
            validations: ValidationLog::default(),
            part_type: PartType::Unknown,
            coversheet_page: None,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn baseline(&self) -> Option<&ExtractionSnapshot> {
        self.baseline.as_ref()
    }

    pub fn working(&self) -> Option<&ExtractionSnapshot> {
        self.working.as_ref()
    }

    pub fn suggested(&self) -> Option<&ExtractionSnapshot> {
        self.suggested.as_ref()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub fn validations(&self) -> &ValidationLog {
        &self.validations
    }

    /// Part type as last reported by OCR.
    pub fn part_type(&self) -> PartType {
        self.part_type
    }

    /// Part type that drives validation: the working `part_type` field when
    /// it names a known type, otherwise the OCR hint.
    pub fn effective_part_type(&self) -> PartType {
        let from_working = self
            .working
            .as_ref()
            .and_then(|w| w.fields.get(names::PART_TYPE))
            .map(|rec| PartType::parse(&rec.value))
            .unwrap_or(PartType::Unknown);
        match from_working {
            PartType::Unknown => self.part_type,
            known => known,
        }
    }

    pub fn coversheet_page(&self) -> Option<u32> {
        self.coversheet_page
    }

    /// Working fields, or an empty map before the first OCR.
    pub fn working_fields(&self) -> FieldMap {
        self.working
            .as_ref()
            .map(|w| w.fields.clone())
            .unwrap_or_default()
    }

    pub fn record_validation(&mut self, result: ValidationResult) {
        self.validations.record(result);
    }

    fn absorb_ocr_hints(&mut self, result: &OcrExtraction) {
        if let Some(pt) = result.part_type {
            if pt != PartType::Unknown {
                self.part_type = pt;
            }
        }
        if result.coversheet_page.is_some() {
            self.coversheet_page = result.coversheet_page;
        }
    }

    fn not_initialized(&self) -> SnapshotError {
        SnapshotError::NotInitialized {
            document_id: self.document_id.clone(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// `INITIAL_OCR`: baseline becomes `result`, and so does working.
    ///
    /// Values typed into working before the first OCR are kept over the OCR
    /// value for the same field. The audit entry records the diff of
    /// working, so a kept value never shows up as overwritten.
    pub fn apply_initial_ocr(&mut self, result: &OcrExtraction, by: &str) -> Result<(), SnapshotError> {
        if self.baseline.is_some() {
            return Err(SnapshotError::BaselineAlreadySet {
                document_id: self.document_id.clone(),
            });
        }
        let before = self.working_fields();
        let baseline = ExtractionSnapshot::from_ocr(result, FieldSource::Ocr, by);
        let mut working = baseline.clone();
        let mut kept = 0;
        for (name, rec) in before.iter().filter(|(_, rec)| !rec.is_blank()) {
            working.fields.insert(name.clone(), rec.clone());
            kept += 1;
        }
        if kept > 0 {
            working.source = FieldSource::ManualOnOcr;
            debug!(
                "Initial OCR on {} keeps {} manually entered field(s)",
                self.document_id, kept
            );
        }

        let changed = diff(&before, &working.fields);
        self.baseline = Some(baseline);
        self.working = Some(working);
        self.absorb_ocr_hints(result);
        self.audit(AuditType::InitialOcr, by, changed, None);
        info!(
            "Initial OCR applied to {} ({} fields)",
            self.document_id,
            result.fields.len()
        );
        Ok(())
    }

    /// `MANUAL_EDIT`: write user values into working.
    ///
    /// Only fields whose normalised value differs are written and audited.
    /// Returns the names of the fields that changed.
    pub fn manual_edit(
        &mut self,
        edits: &BTreeMap<String, String>,
        by: &str,
        note: Option<String>,
    ) -> Vec<String> {
        let has_baseline = self.baseline.is_some();
        let working = self.working.get_or_insert_with(|| ExtractionSnapshot {
            fields: FieldMap::new(),
            raw: Value::Null,
            source: FieldSource::Manual,
            last_updated_at: Utc::now(),
            last_updated_by: by.to_string(),
        });

        let mut changed = BTreeMap::new();
        for (name, new_value) in edits {
            let old_value = working
                .fields
                .get(name)
                .map(|r| r.value.clone())
                .unwrap_or_default();
            if normalized_value(name, &old_value) == normalized_value(name, new_value) {
                continue;
            }
            let value = new_value.trim().to_string();
            match working.fields.get_mut(name) {
                Some(rec) => {
                    rec.source = match rec.source {
                        FieldSource::Manual => FieldSource::Manual,
                        _ => FieldSource::ManualOnOcr,
                    };
                    rec.value = value.clone();
                    rec.confidence = 1.0;
                }
                None => {
                    let field_type = FieldClass::of(name)
                        .map(|c| c.field_type())
                        .unwrap_or(FieldType::String);
                    working
                        .fields
                        .insert(name.clone(), FieldRecord::new(value.clone(), field_type, FieldSource::Manual));
                }
            }
            changed.insert(
                name.clone(),
                FieldChange {
                    old: old_value,
                    new: value,
                },
            );
        }

        if changed.is_empty() {
            debug!("Manual save on {} changed nothing", self.document_id);
            return Vec::new();
        }
        working.source = if has_baseline {
            FieldSource::ManualOnOcr
        } else {
            FieldSource::Manual
        };
        working.touch(by);
        let names = changed.keys().cloned().collect();
        self.audit(AuditType::ManualSave, by, changed, note);
        names
    }

    /// `RE_OCR_STAGE`: hold a new OCR result as the suggestion.
    pub fn stage_suggested(&mut self, result: &OcrExtraction, by: &str) {
        self.suggested = Some(ExtractionSnapshot::from_ocr(
            result,
            FieldSource::OcrManualTrigger,
            by,
        ));
        self.absorb_ocr_hints(result);
        debug!("Staged suggested extraction for {}", self.document_id);
    }

    /// `PROMOTE_SUGGESTED`: fold the staged suggestion into working.
    ///
    /// Returns the names of the working fields that changed.
    pub fn promote_suggested(&mut self, mode: PromoteMode, by: &str) -> Result<Vec<String>, SnapshotError> {
        let suggested = self.suggested.take().ok_or_else(|| SnapshotError::NoSuggestion {
            document_id: self.document_id.clone(),
        })?;
        let before = self.working_fields();

        match mode {
            PromoteMode::FullOverwrite => {
                let changed = diff(&before, &suggested.fields);
                let mut snapshot = suggested;
                snapshot.touch(by);
                self.baseline = Some(snapshot.clone());
                self.working = Some(snapshot);
                let names = changed.keys().cloned().collect();
                self.audit(AuditType::OcrApplied, by, changed, None);
                Ok(names)
            }
            PromoteMode::FillEmpty => {
                let Some(working) = self.working.as_mut() else {
                    self.suggested = Some(suggested);
                    return Err(self.not_initialized());
                };
                let mut changed = BTreeMap::new();
                for (name, rec) in &suggested.fields {
                    if rec.is_blank() {
                        continue;
                    }
                    let empty = working.fields.get(name).map(|r| r.is_blank()).unwrap_or(true);
                    if empty {
                        let old = working
                            .fields
                            .insert(name.clone(), rec.clone())
                            .map(|r| r.value)
                            .unwrap_or_default();
                        changed.insert(
                            name.clone(),
                            FieldChange {
                                old,
                                new: rec.value.clone(),
                            },
                        );
                    }
                }
                if changed.is_empty() {
                    return Ok(Vec::new());
                }
                working.touch(by);
                let names = changed.keys().cloned().collect();
                self.audit(AuditType::CoversheetReocrMerge, by, changed, None);
                Ok(names)
            }
        }
    }

    /// `AUTO_FIX`: run the normaliser over working and keep its output.
    pub fn apply_auto_fix(&mut self, by: &str) -> Result<AutoFixReport, SnapshotError> {
        let not_initialized = self.not_initialized();
        let working = self.working.as_mut().ok_or(not_initialized)?;
        let report = auto_fix(&working.fields);
        let changed: BTreeMap<String, FieldChange> = report
            .changed_fields()
            .map(|name| {
                let entry = &report.applied[name];
                (
                    name.to_string(),
                    FieldChange {
                        old: entry.original.clone(),
                        new: entry.fixed.clone(),
                    },
                )
            })
            .collect();
        if !changed.is_empty() {
            working.fields = report.fields.clone();
            working.touch(by);
            self.audit(AuditType::AutoFix, by, changed, None);
        }
        Ok(report)
    }

    fn audit(
        &mut self,
        entry_type: AuditType,
        by: &str,
        changed_fields: BTreeMap<String, FieldChange>,
        note: Option<String>,
    ) {
        self.audit_log.append(AuditEntry {
            entry_type,
            updated_at: Utc::now(),
            updated_by: by.to_string(),
            changed_fields,
            note,
        });
    }
}

fn diff(before: &FieldMap, after: &FieldMap) -> BTreeMap<String, FieldChange> {
    let mut out = BTreeMap::new();
    for name in before.keys().chain(after.keys()) {
        let old = before.get(name).map(|r| r.value.as_str()).unwrap_or("");
        let new = after.get(name).map(|r| r.value.as_str()).unwrap_or("");
        if old != new {
            out.insert(
                name.clone(),
                FieldChange {
                    old: old.to_string(),
                    new: new.to_string(),
                },
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr(pairs: &[(&str, &str)]) -> OcrExtraction {
        OcrExtraction {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), FieldRecord::ocr(*v, 0.8)))
                .collect(),
            raw: Value::Null,
            coversheet_page: Some(1),
            part_type: Some(PartType::Institutional),
        }
    }

    fn edits(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn initial_ocr_sets_baseline_once() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(&ocr(&[(names::PROVIDER_NAME, "Acme")]), "system")
            .unwrap();
        assert_eq!(doc.baseline(), doc.working());
        assert_eq!(doc.part_type(), PartType::Institutional);
        assert_eq!(doc.audit_log().last().unwrap().entry_type, AuditType::InitialOcr);

        let err = doc.apply_initial_ocr(&ocr(&[]), "system").unwrap_err();
        assert!(matches!(err, SnapshotError::BaselineAlreadySet { .. }));
    }

    #[test]
    fn initial_ocr_keeps_values_typed_before_it() {
        let mut doc = DocumentExtraction::new("D1");
        doc.manual_edit(&edits(&[(names::PROVIDER_NPI, "1234567890")]), "jdoe", None);
        doc.apply_initial_ocr(
            &ocr(&[
                (names::PROVIDER_NAME, "Acme"),
                (names::PROVIDER_NPI, "9999999999"),
            ]),
            "system",
        )
        .unwrap();

        let w = doc.working().unwrap();
        assert_eq!(w.fields[names::PROVIDER_NPI].value, "1234567890");
        assert_eq!(w.fields[names::PROVIDER_NPI].source, FieldSource::Manual);
        assert_eq!(w.fields[names::PROVIDER_NAME].value, "Acme");
        assert_eq!(doc.baseline().unwrap().fields[names::PROVIDER_NPI].value, "9999999999");

        let entry = doc.audit_log().last().unwrap();
        assert_eq!(entry.entry_type, AuditType::InitialOcr);
        assert_eq!(
            entry.changed_fields.keys().collect::<Vec<_>>(),
            vec![names::PROVIDER_NAME]
        );
        assert_eq!(doc.audit_log().len(), 2);
    }

    #[test]
    fn working_part_type_field_overrides_the_ocr_hint() {
        let mut doc = DocumentExtraction::new("D1");
        assert_eq!(doc.effective_part_type(), PartType::Unknown);
        doc.apply_initial_ocr(&ocr(&[(names::PART_TYPE, "")]), "system").unwrap();
        assert_eq!(doc.effective_part_type(), PartType::Institutional);

        doc.manual_edit(&edits(&[(names::PART_TYPE, "Part B")]), "jdoe", None);
        assert_eq!(doc.effective_part_type(), PartType::Professional);
        assert_eq!(doc.part_type(), PartType::Institutional);

        doc.manual_edit(&edits(&[(names::PART_TYPE, "n/a")]), "jdoe", None);
        assert_eq!(doc.effective_part_type(), PartType::Institutional);
    }

    #[test]
    fn manual_edit_audits_only_real_changes() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(
            &ocr(&[
                (names::PROVIDER_PHONE, "(732) 849-0077"),
                (names::PROVIDER_NAME, "Acme"),
            ]),
            "system",
        )
        .unwrap();
        let changed = doc.manual_edit(
            &edits(&[
                (names::PROVIDER_PHONE, "732-849-0077"),
                (names::PROVIDER_NAME, "Acme Health"),
                (names::PROVIDER_FAX, "7328490078"),
            ]),
            "jdoe",
            Some("fixed name".into()),
        );
        assert_eq!(changed, vec![names::PROVIDER_FAX.to_string(), names::PROVIDER_NAME.to_string()]);

        let entry = doc.audit_log().last().unwrap();
        assert_eq!(entry.entry_type, AuditType::ManualSave);
        assert_eq!(entry.changed_fields.len(), 2);
        assert_eq!(entry.note.as_deref(), Some("fixed name"));

        let working = doc.working().unwrap();
        assert_eq!(working.fields[names::PROVIDER_NAME].source, FieldSource::ManualOnOcr);
        assert_eq!(working.fields[names::PROVIDER_FAX].source, FieldSource::Manual);
        assert_eq!(working.fields[names::PROVIDER_FAX].field_type, FieldType::Phone);
        // Baseline untouched.
        assert_eq!(doc.baseline().unwrap().fields[names::PROVIDER_NAME].value, "Acme");

        let before = doc.audit_log().len();
        assert!(doc.manual_edit(&edits(&[(names::PROVIDER_NAME, " Acme Health ")]), "jdoe", None).is_empty());
        assert_eq!(doc.audit_log().len(), before);
    }

    #[test]
    fn fill_empty_preserves_user_values_and_baseline() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(&ocr(&[(names::PROVIDER_NAME, "")]), "system").unwrap();
        doc.manual_edit(&edits(&[(names::PROVIDER_NPI, "1234567890")]), "jdoe", None);

        doc.stage_suggested(
            &ocr(&[
                (names::PROVIDER_NAME, "Acme"),
                (names::PROVIDER_NPI, "9999999999"),
            ]),
            "jdoe",
        );
        assert!(doc.suggested().is_some());
        let changed = doc.promote_suggested(PromoteMode::FillEmpty, "jdoe").unwrap();
        assert_eq!(changed, vec![names::PROVIDER_NAME.to_string()]);

        let w = doc.working().unwrap();
        assert_eq!(w.fields[names::PROVIDER_NPI].value, "1234567890");
        assert_eq!(w.fields[names::PROVIDER_NAME].source, FieldSource::OcrManualTrigger);
        assert_eq!(doc.baseline().unwrap().fields[names::PROVIDER_NAME].value, "");
        assert_eq!(
            doc.audit_log().last().unwrap().entry_type,
            AuditType::CoversheetReocrMerge
        );
        assert!(doc.suggested().is_none());
    }

    #[test]
    fn full_overwrite_replaces_baseline() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(&ocr(&[(names::PROVIDER_NAME, "Acme")]), "system").unwrap();
        doc.manual_edit(&edits(&[(names::PROVIDER_NAME, "Typed")]), "jdoe", None);
        doc.stage_suggested(&ocr(&[(names::PROVIDER_NAME, "Acme Corp")]), "jdoe");
        doc.promote_suggested(PromoteMode::FullOverwrite, "jdoe").unwrap();

        assert_eq!(doc.baseline().unwrap().fields[names::PROVIDER_NAME].value, "Acme Corp");
        assert_eq!(doc.working(), doc.baseline());
        assert_eq!(doc.audit_log().last().unwrap().entry_type, AuditType::OcrApplied);
    }

    #[test]
    fn promote_without_suggestion_fails() {
        let mut doc = DocumentExtraction::new("D1");
        let err = doc.promote_suggested(PromoteMode::FillEmpty, "x").unwrap_err();
        assert!(matches!(err, SnapshotError::NoSuggestion { .. }));
    }

    #[test]
    fn auto_fix_audits_once_and_is_idempotent() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(
            &ocr(&[
                (names::BENEFICIARY_CITY, "Whiting NJ"),
                (names::BENEFICIARY_STATE, ""),
                (names::BENEFICIARY_PHONE, "732849"),
            ]),
            "system",
        )
        .unwrap();
        let first = doc.apply_auto_fix("system").unwrap();
        assert!(first.has_changes());
        let len = doc.audit_log().len();
        assert_eq!(doc.audit_log().last().unwrap().entry_type, AuditType::AutoFix);

        let second = doc.apply_auto_fix("system").unwrap();
        assert!(!second.has_changes());
        assert_eq!(doc.audit_log().len(), len);

        let w = doc.working().unwrap();
        assert_eq!(w.fields[names::BENEFICIARY_CITY].value, "Whiting");
        assert_eq!(w.fields[names::BENEFICIARY_STATE].value, "NJ");
        assert_eq!(w.fields[names::BENEFICIARY_PHONE].value, "732849");
    }

    #[test]
    fn audit_log_is_ordered() {
        let mut doc = DocumentExtraction::new("D1");
        doc.apply_initial_ocr(&ocr(&[(names::PROVIDER_NAME, "A")]), "s").unwrap();
        for i in 0..5 {
            doc.manual_edit(&edits(&[(names::PROVIDER_NAME, &format!("B{i}"))]), "u", None);
        }
        let entries = doc.audit_log().entries();
        assert_eq!(entries.len(), 6);
        assert!(entries.windows(2).all(|w| w[0].updated_at <= w[1].updated_at));
    }

    #[test]
    fn only_latest_validation_active() {
        let mut log = ValidationLog::default();
        let result = crate::fields::validate::validate(&FieldMap::new(), PartType::Unknown);
        log.record(result.clone());
        log.record(result.stamped("u"));
        assert_eq!(log.records().iter().filter(|r| r.active).count(), 1);
        assert_eq!(log.active().unwrap().validated_by.as_deref(), Some("u"));
    }
}

//! Projection of working fields onto the case's canonical record.

use crate::fields::{names, FieldMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Written into an NPI slot whose source value is not a valid NPI.
pub const NPI_SENTINEL: &str = "0000000000";

const TBD: &str = "TBD";

/// The one record downstream systems read for a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub case_id: String,
    pub beneficiary_first_name: Option<String>,
    pub beneficiary_last_name: Option<String>,
    pub beneficiary_mbi: Option<String>,
    pub beneficiary_dob: Option<String>,
    pub provider_name: Option<String>,
    pub provider_npi: Option<String>,
    pub facility_npi: Option<String>,
    pub submission_type: Option<String>,
    pub procedure_code_1: Option<String>,
    pub procedure_code_2: Option<String>,
    pub procedure_code_3: Option<String>,
    /// `", "`-joined non-empty procedure slots.
    pub procedure_codes: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            ..Default::default()
        }
    }

    fn slot_mut(&mut self, attr: Attribute) -> &mut Option<String> {
        match attr {
            Attribute::BeneficiaryFirstName => &mut self.beneficiary_first_name,
            Attribute::BeneficiaryLastName => &mut self.beneficiary_last_name,
            Attribute::BeneficiaryMbi => &mut self.beneficiary_mbi,
            Attribute::BeneficiaryDob => &mut self.beneficiary_dob,
            Attribute::ProviderName => &mut self.provider_name,
            Attribute::ProviderNpi => &mut self.provider_npi,
            Attribute::FacilityNpi => &mut self.facility_npi,
            Attribute::SubmissionType => &mut self.submission_type,
            Attribute::ProcedureCode1 => &mut self.procedure_code_1,
            Attribute::ProcedureCode2 => &mut self.procedure_code_2,
            Attribute::ProcedureCode3 => &mut self.procedure_code_3,
        }
    }

    fn joined_procedure_codes(&self) -> Option<String> {
        let joined = [
            &self.procedure_code_1,
            &self.procedure_code_2,
            &self.procedure_code_3,
        ]
        .into_iter()
        .flatten()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(TBD))
        .collect::<Vec<_>>()
        .join(", ");
        (!joined.is_empty()).then_some(joined)
    }
}

/// Canonical attributes fed from working fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    BeneficiaryFirstName,
    BeneficiaryLastName,
    BeneficiaryMbi,
    BeneficiaryDob,
    ProviderName,
    ProviderNpi,
    FacilityNpi,
    SubmissionType,
    ProcedureCode1,
    ProcedureCode2,
    ProcedureCode3,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// Attribute → acceptable source fields, most preferred first.
pub const FIELD_SOURCES: &[(Attribute, &[&str])] = &[
    (
        Attribute::BeneficiaryFirstName,
        &[names::BENEFICIARY_FIRST_NAME, "patient_first_name"],
    ),
    (
        Attribute::BeneficiaryLastName,
        &[names::BENEFICIARY_LAST_NAME, "patient_last_name"],
    ),
    (Attribute::BeneficiaryMbi, &[names::BENEFICIARY_MBI, "medicare_id"]),
    (Attribute::BeneficiaryDob, &[names::BENEFICIARY_DOB, "patient_dob"]),
    (
        Attribute::ProviderName,
        &[names::PROVIDER_NAME, names::FACILITY_NAME],
    ),
    (Attribute::ProviderNpi, &[names::PROVIDER_NPI, "rendering_npi"]),
    (Attribute::FacilityNpi, &[names::FACILITY_NPI]),
    (
        Attribute::SubmissionType,
        &[names::SUBMISSION_TYPE, names::REQUEST_TYPE],
    ),
    (Attribute::ProcedureCode1, &[names::PROCEDURE_CODE_1]),
    (Attribute::ProcedureCode2, &[names::PROCEDURE_CODE_2]),
    (Attribute::ProcedureCode3, &[names::PROCEDURE_CODE_3]),
];

/// What a sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub updated: Vec<Attribute>,
    pub procedure_codes_rebuilt: bool,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        !self.updated.is_empty() || self.procedure_codes_rebuilt
    }
}

fn is_writable(current: &Option<String>) -> bool {
    match current.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(v) => v.eq_ignore_ascii_case(TBD),
    }
}

fn pick_source<'a>(fields: &'a FieldMap, candidates: &[&str]) -> Option<&'a str> {
    candidates.iter().find_map(|name| {
        let v = fields.get(*name)?.value.trim();
        (!v.is_empty() && !v.eq_ignore_ascii_case(TBD)).then_some(v)
    })
}

/// NPIs: nine digits are zero-padded; anything else that is not ten
/// digits becomes [`NPI_SENTINEL`].
pub fn normalize_npi(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if !compact.chars().all(|c| c.is_ascii_digit()) {
        return NPI_SENTINEL.to_string();
    }
    match compact.len() {
        10 => compact,
        9 => format!("0{compact}"),
        _ => NPI_SENTINEL.to_string(),
    }
}

/// Copy working values into `record` without clobbering populated attributes.
///
/// An attribute is written only while it is empty or `TBD`. The joined
/// procedure list is rebuilt from the slots when it is writable or still
/// equal to what the slots produced before this pass.
pub fn sync_canonical(record: &mut CanonicalRecord, working: &FieldMap) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    let previous_join = record.joined_procedure_codes();

    for (attr, candidates) in FIELD_SOURCES {
        let Some(value) = pick_source(working, candidates) else {
            continue;
        };
        let value = match attr {
            Attribute::ProviderNpi | Attribute::FacilityNpi => normalize_npi(value),
            _ => value.to_string(),
        };
        let slot = record.slot_mut(*attr);
        if is_writable(slot) && slot.as_deref() != Some(value.as_str()) {
            *slot = Some(value);
            outcome.updated.push(*attr);
        }
    }

    let rebuilt = record.joined_procedure_codes();
    let owned_by_sync = is_writable(&record.procedure_codes) || record.procedure_codes == previous_join;
    if owned_by_sync && rebuilt.is_some() && record.procedure_codes != rebuilt {
        record.procedure_codes = rebuilt;
        outcome.procedure_codes_rebuilt = true;
    }

    if outcome.changed() {
        record.updated_at = Some(Utc::now());
        debug!(
            "Canonical record {} updated: {} attribute(s)",
            record.case_id,
            outcome.updated.len() + usize::from(outcome.procedure_codes_rebuilt)
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldRecord;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldRecord::ocr(*v, 0.9)))
            .collect()
    }

    #[test]
    fn fills_empty_and_tbd_only() {
        let mut rec = CanonicalRecord::new("C1");
        rec.provider_name = Some("tbd".into());
        rec.beneficiary_last_name = Some("Smith".into());
        let out = sync_canonical(
            &mut rec,
            &map(&[
                (names::PROVIDER_NAME, "Acme"),
                (names::BENEFICIARY_LAST_NAME, "Jones"),
                (names::BENEFICIARY_FIRST_NAME, "Ann"),
            ]),
        );
        assert!(out.changed());
        assert_eq!(rec.provider_name.as_deref(), Some("Acme"));
        assert_eq!(rec.beneficiary_last_name.as_deref(), Some("Smith"));
        assert_eq!(rec.beneficiary_first_name.as_deref(), Some("Ann"));
        assert!(rec.updated_at.is_some());
    }

    #[test]
    fn first_usable_alias_wins() {
        let mut rec = CanonicalRecord::new("C1");
        sync_canonical(
            &mut rec,
            &map(&[
                (names::SUBMISSION_TYPE, "TBD"),
                (names::REQUEST_TYPE, "I"),
            ]),
        );
        assert_eq!(rec.submission_type.as_deref(), Some("I"));
    }

    #[test]
    fn npi_normalisation() {
        assert_eq!(normalize_npi("123456789"), "0123456789");
        assert_eq!(normalize_npi("1234-567-890"), "1234567890");
        assert_eq!(normalize_npi("12AB"), NPI_SENTINEL);
        assert_eq!(normalize_npi("12345678901"), NPI_SENTINEL);
    }

    #[test]
    fn procedure_list_rebuilt_from_slots() {
        let mut rec = CanonicalRecord::new("C1");
        sync_canonical(&mut rec, &map(&[(names::PROCEDURE_CODE_1, "64561")]));
        assert_eq!(rec.procedure_codes.as_deref(), Some("64561"));

        sync_canonical(&mut rec, &map(&[(names::PROCEDURE_CODE_3, "64590")]));
        assert_eq!(rec.procedure_codes.as_deref(), Some("64561, 64590"));
    }

    #[test]
    fn independent_list_edit_survives() {
        let mut rec = CanonicalRecord::new("C1");
        rec.procedure_codes = Some("99999".into());
        sync_canonical(&mut rec, &map(&[(names::PROCEDURE_CODE_1, "64561")]));
        assert_eq!(rec.procedure_code_1.as_deref(), Some("64561"));
        assert_eq!(rec.procedure_codes.as_deref(), Some("99999"));
    }

    #[test]
    fn nothing_to_do_reports_unchanged() {
        let mut rec = CanonicalRecord::new("C1");
        let fields = map(&[(names::PROVIDER_NAME, "Acme")]);
        assert!(sync_canonical(&mut rec, &fields).changed());
        let snapshot = rec.clone();
        assert!(!sync_canonical(&mut rec, &fields).changed());
        assert_eq!(rec, snapshot);
    }

    #[test]
    fn never_overwrites_populated_attributes() {
        let populated = ["Keep", "keep me", "0", "TBD-ish"];
        for existing in populated {
            let mut rec = CanonicalRecord::new("C1");
            for (attr, _) in FIELD_SOURCES {
                *rec.slot_mut(*attr) = Some(existing.to_string());
            }
            let before = rec.clone();
            let fields: FieldMap = FIELD_SOURCES
                .iter()
                .flat_map(|(_, c)| c.iter())
                .map(|n| (n.to_string(), FieldRecord::ocr("other", 1.0)))
                .collect();
            sync_canonical(&mut rec, &fields);
            for (attr, _) in FIELD_SOURCES {
                assert_eq!(
                    rec.slot_mut(*attr).clone(),
                    before.clone().slot_mut(*attr).clone(),
                    "{attr} overwritten"
                );
            }
        }
    }
}

//! Field validation rules.
//!
//! [`validate`] is a pure function of its inputs. It first runs
//! [`auto_fix`](super::autofix::auto_fix) so that values the normaliser can
//! repair are judged in their repaired form, then evaluates every rule and
//! returns the complete set of violations grouped by field name.

use super::autofix::{auto_fix, AutoFixEntry};
use super::states::detect_trailing_state;
use super::{field_value, names, FieldMap, PartType, ADDRESS_GROUPS};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State code every provider and facility address must carry.
pub const JURISDICTION_STATE: &str = "NJ";

pub const REQUEST_TYPES: [&str; 2] = ["I", "R"];

/// Allowed leading digits of an institutional CCN.
pub const CCN_PREFIXES: [&str; 2] = ["31", "30"];

/// A set of procedure codes whose claims require a covered diagnosis.
#[derive(Debug, Clone, Copy)]
pub struct ProcedureGroup {
    pub name: &'static str,
    pub procedure_codes: &'static [&'static str],
    /// Exact diagnosis codes, without periods.
    pub diagnoses: &'static [&'static str],
    /// Diagnosis code families, matched as prefixes.
    pub diagnosis_prefixes: &'static [&'static str],
}

impl ProcedureGroup {
    pub fn covers_procedure(&self, code: &str) -> bool {
        let code = code.trim();
        self.procedure_codes.iter().any(|c| c.eq_ignore_ascii_case(code))
    }

    /// Whether `dx` is on this group's allow-list, ignoring case and periods.
    pub fn allows_diagnosis(&self, dx: &str) -> bool {
        let key = diagnosis_key(dx);
        if key.is_empty() {
            return false;
        }
        self.diagnoses.iter().any(|d| *d == key)
            || self.diagnosis_prefixes.iter().any(|p| key.starts_with(p))
    }
}

pub const PROCEDURE_GROUPS: &[ProcedureGroup] = &[
    ProcedureGroup {
        name: "sacral nerve stimulation",
        procedure_codes: &["64561", "64581", "64590", "64595"],
        diagnoses: &[
            "N3941", "N3942", "N3943", "N3944", "N3945", "N3946", "N39490", "N39498", "N3281",
            "N3289", "R32", "R3914", "R3915", "R338", "R339", "N319", "K5902", "K5909", "R152",
            "R159",
        ],
        diagnosis_prefixes: &[],
    },
    ProcedureGroup {
        name: "hypoglossal nerve stimulation",
        procedure_codes: &["64582", "64583", "64584"],
        diagnoses: &["G4733"],
        diagnosis_prefixes: &[],
    },
    ProcedureGroup {
        name: "skin substitute",
        procedure_codes: &[
            "15271", "15272", "15273", "15274", "15275", "15276", "15277", "15278",
        ],
        diagnoses: &["E11621", "E10621", "E13621"],
        diagnosis_prefixes: &["L97", "I83", "I87"],
    },
];

fn diagnosis_key(dx: &str) -> String {
    dx.trim().replace('.', "").to_ascii_uppercase()
}

/// Outcome of validating one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Field name → messages. Only fields with violations appear.
    pub field_errors: BTreeMap<String, Vec<String>>,
    /// What auto-fix repaired or could not repair before the rules ran.
    pub auto_fix_applied: BTreeMap<String, AutoFixEntry>,
    pub has_errors: bool,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validated_by: Option<String>,
}

impl ValidationResult {
    /// Record who ran the validation and when.
    pub fn stamped(mut self, by: &str) -> Self {
        self.validated_at = Some(Utc::now());
        self.validated_by = Some(by.to_string());
        self
    }

    pub fn errors_for(&self, field: &str) -> &[String] {
        self.field_errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn error_count(&self) -> usize {
        self.field_errors.values().map(Vec::len).sum()
    }
}

/// Validate `fields` for a claim of `part_type`.
pub fn validate(fields: &FieldMap, part_type: PartType) -> ValidationResult {
    let report = auto_fix(fields);
    let field_errors = check_rules(&report.fields, part_type);
    ValidationResult {
        has_errors: !field_errors.is_empty(),
        field_errors,
        auto_fix_applied: report.applied,
        validated_at: None,
        validated_by: None,
    }
}

#[derive(Default)]
struct Errors(BTreeMap<String, Vec<String>>);

impl Errors {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        let list = self.0.entry(field.to_string()).or_default();
        if !list.contains(&message) {
            list.push(message);
        }
    }
}

/// Evaluate every rule against `fields` as given, without auto-fix.
pub fn check_rules(fields: &FieldMap, part_type: PartType) -> BTreeMap<String, Vec<String>> {
    let mut errors = Errors::default();

    for name in names::JURISDICTION_STATE_FIELDS {
        let v = field_value(fields, name);
        if !v.is_empty() && !v.eq_ignore_ascii_case(JURISDICTION_STATE) {
            errors.add(name, format!("State must be {JURISDICTION_STATE}"));
        }
    }

    let request_type = field_value(fields, names::REQUEST_TYPE);
    if !request_type.is_empty()
        && !REQUEST_TYPES.iter().any(|t| t.eq_ignore_ascii_case(request_type))
    {
        errors.add(
            names::REQUEST_TYPE,
            format!("Request type must be one of: {}", REQUEST_TYPES.join(", ")),
        );
    }

    for (name, record) in fields {
        let v = record.value.trim();
        if v.is_empty() {
            continue;
        }
        match super::FieldClass::of(name) {
            Some(super::FieldClass::Phone) if !is_digits_of_len(v, 10) => {
                errors.add(name, "Phone number must be exactly 10 digits")
            }
            Some(super::FieldClass::Fax) if !is_digits_of_len(v, 10) => {
                errors.add(name, "Fax number must be exactly 10 digits")
            }
            Some(super::FieldClass::Date) if !is_iso_date(v) => {
                errors.add(name, "Date must be in YYYY-MM-DD format")
            }
            Some(super::FieldClass::Diagnosis) if v.contains('.') => {
                errors.add(name, "Diagnosis code must not contain periods")
            }
            Some(super::FieldClass::Npi) if !is_digits_of_len(v, 10) => {
                errors.add(name, "NPI must be exactly 10 digits")
            }
            _ => {}
        }
    }

    let place = field_value(fields, names::PLACE_OF_SERVICE);
    let (pos_field, pos) = if place.is_empty() {
        (
            names::LOCATION_OF_SERVICE,
            field_value(fields, names::LOCATION_OF_SERVICE),
        )
    } else {
        (names::PLACE_OF_SERVICE, place)
    };
    if !pos.is_empty() && !pos.chars().all(|c| c.is_ascii_digit()) {
        errors.add(pos_field, "Place of service must be numeric");
    }

    for group in ADDRESS_GROUPS {
        if detect_trailing_state(field_value(fields, group.city)).is_some() {
            errors.add(group.city, "City must not contain a state");
        }
    }

    for slot in 1..names::PROCEDURE_CODES.len() {
        let code = field_value(fields, names::PROCEDURE_CODES[slot]);
        let units = field_value(fields, names::UNITS_OF_SERVICE[slot]);
        if !code.is_empty() && units.is_empty() {
            errors.add(
                names::UNITS_OF_SERVICE[slot],
                format!(
                    "Units of service are required when procedure code {} is provided",
                    slot + 1
                ),
            );
        }
    }

    if part_type == PartType::Institutional {
        let ccn = field_value(fields, names::FACILITY_CCN);
        if !ccn.is_empty()
            && !(ccn.chars().all(|c| c.is_ascii_digit())
                && CCN_PREFIXES.iter().any(|p| ccn.starts_with(p)))
        {
            errors.add(
                names::FACILITY_CCN,
                format!(
                    "CCN must be numeric and start with {}",
                    CCN_PREFIXES.join(" or ")
                ),
            );
        }
    }

    check_covered_diagnosis(fields, &mut errors);

    errors.0
}

fn check_covered_diagnosis(fields: &FieldMap, errors: &mut Errors) {
    let procedures: Vec<&str> = names::PROCEDURE_CODES
        .iter()
        .map(|n| field_value(fields, n))
        .filter(|c| !c.is_empty())
        .collect();
    let diagnoses: Vec<&str> = field_value(fields, names::DIAGNOSIS_CODES)
        .split([',', ';'])
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();

    for group in PROCEDURE_GROUPS {
        if !procedures.iter().any(|p| group.covers_procedure(p)) {
            continue;
        }
        if diagnoses.is_empty() {
            errors.add(
                names::DIAGNOSIS_CODES,
                format!("Diagnosis code is required for {} procedures", group.name),
            );
        } else if !diagnoses.iter().any(|d| group.allows_diagnosis(d)) {
            errors.add(
                names::DIAGNOSIS_CODES,
                format!("Diagnosis code is not covered for {} procedures", group.name),
            );
        }
    }
}

fn is_digits_of_len(v: &str, len: usize) -> bool {
    v.len() == len && v.chars().all(|c| c.is_ascii_digit())
}

fn is_iso_date(v: &str) -> bool {
    v.len() == 10 && NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok()
}

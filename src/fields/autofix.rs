//! Deterministic clean-up of OCR field values.
//!
//! Every fix is idempotent: running [`auto_fix`] on its own output changes
//! nothing. A value that cannot be repaired is left as-is in the field map
//! and reported with [`FixStatus::Invalid`] so validation can flag it.

use super::states::{detect_trailing_state, normalize_state};
use super::{AddressGroup, FieldClass, FieldMap, FieldRecord, ADDRESS_GROUPS};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Address line 1 longer than this gets its suite moved to line 2.
pub const SUITE_THRESHOLD_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Fixed,
    Invalid,
}

/// What auto-fix did to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFixEntry {
    pub original: String,
    pub fixed: String,
    pub status: FixStatus,
}

/// Result of running [`auto_fix`] over a field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoFixReport {
    /// The input with every applicable fix written back.
    pub fields: FieldMap,
    /// Per-field record of what changed or could not be fixed.
    pub applied: BTreeMap<String, AutoFixEntry>,
}

impl AutoFixReport {
    /// Names of fields whose value actually changed.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.applied
            .iter()
            .filter(|(_, e)| e.status == FixStatus::Fixed)
            .map(|(k, _)| k.as_str())
    }

    pub fn has_changes(&self) -> bool {
        self.changed_fields().next().is_some()
    }
}

/// Outcome of a single-value fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixed {
    pub value: String,
    pub valid: bool,
}

/// Phone and fax numbers: digits only, valid iff exactly ten remain.
pub fn fix_phone(raw: &str) -> Fixed {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let valid = digits.len() == 10;
    Fixed { value: digits, valid }
}

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid regex"));
static YMD_SLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[/.](\d{1,2})[/.](\d{1,2})$").expect("valid regex"));
static NUMERIC_DMY_OR_MDY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})$").expect("valid regex"));

/// Dates: normalise to `YYYY-MM-DD`.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY` and, when the first
/// number cannot be a month, `DD/MM/YYYY`. Unparseable or impossible dates
/// yield an empty, invalid value.
pub fn fix_date(raw: &str) -> Fixed {
    let s = raw.trim();
    let parsed = if let Some(c) = ISO_DATE.captures(s).or_else(|| YMD_SLASH.captures(s)) {
        ymd(&c[1], &c[2], &c[3])
    } else if let Some(c) = NUMERIC_DMY_OR_MDY.captures(s) {
        let first: u32 = c[1].parse().unwrap_or(0);
        if first > 12 {
            ymd(&c[3], &c[2], &c[1])
        } else {
            ymd(&c[3], &c[1], &c[2])
        }
    } else {
        None
    };
    match parsed {
        Some(d) => Fixed {
            value: d.format("%Y-%m-%d").to_string(),
            valid: true,
        },
        None => Fixed {
            value: String::new(),
            valid: false,
        },
    }
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

/// Diagnosis lists: periods removed, entries trimmed and joined with `", "`.
pub fn fix_diagnosis(raw: &str) -> String {
    raw.split([',', ';'])
        .map(|code| code.replace('.', "").trim().to_string())
        .filter(|code| !code.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

static SUITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[,\s]+((?:(?:suite|ste|unit|apt)\b\.?|#)\s*[A-Za-z0-9\-]+)\s*$")
        .expect("valid regex")
});

/// The four lines of one address block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLines {
    pub line_1: String,
    pub line_2: String,
    pub city: String,
    pub state: String,
}

/// Address blocks.
///
/// 1. A trailing state in the city moves to the state field, provided the
///    state is empty or already equal to it.
/// 2. An over-long line 1 ending in a suite designator gives the suite to
///    an empty line 2.
/// 3. Full state names become abbreviations.
pub fn fix_address(input: &AddressLines) -> AddressLines {
    let mut out = input.clone();

    if let Some(split) = detect_trailing_state(&out.city) {
        let current = out.state.trim();
        let current_abbr = normalize_state(current);
        if current.is_empty() || current_abbr == Some(split.state) {
            out.city = split.city;
            out.state = split.state.to_string();
        }
    }

    if out.line_1.trim().chars().count() > SUITE_THRESHOLD_CHARS && out.line_2.trim().is_empty() {
        let line = out.line_1.trim().to_string();
        if let Some(m) = SUITE.captures(&line) {
            let whole = m.get(0).map(|g| g.start()).unwrap_or(line.len());
            let head = line[..whole].trim_end_matches([',', ' ']).to_string();
            if !head.is_empty() {
                out.line_2 = m[1].trim().to_string();
                out.line_1 = head;
            }
        }
    }

    if let Some(abbr) = normalize_state(&out.state) {
        out.state = abbr.to_string();
    }

    out
}

/// Run every applicable fix over `fields`.
pub fn auto_fix(fields: &FieldMap) -> AutoFixReport {
    let mut report = AutoFixReport {
        fields: fields.clone(),
        applied: BTreeMap::new(),
    };

    for (name, record) in fields {
        if record.is_blank() {
            continue;
        }
        let (fixed, valid) = match FieldClass::of(name) {
            Some(FieldClass::Phone | FieldClass::Fax) => {
                let f = fix_phone(&record.value);
                (f.value, f.valid)
            }
            Some(FieldClass::Date) => {
                let f = fix_date(&record.value);
                (f.value, f.valid)
            }
            Some(FieldClass::Diagnosis) => (fix_diagnosis(&record.value), true),
            _ => continue,
        };
        if !valid {
            report.applied.insert(
                name.clone(),
                AutoFixEntry {
                    original: record.value.clone(),
                    fixed,
                    status: FixStatus::Invalid,
                },
            );
        } else if fixed != record.value {
            set_value(&mut report, name, fixed);
        }
    }

    for group in ADDRESS_GROUPS {
        fix_address_group(&mut report, &group);
    }

    report
}

fn fix_address_group(report: &mut AutoFixReport, group: &AddressGroup) {
    let get = |name: &str| {
        report
            .fields
            .get(name)
            .map(|r| r.value.clone())
            .unwrap_or_default()
    };
    let before = AddressLines {
        line_1: get(group.line_1),
        line_2: get(group.line_2),
        city: get(group.city),
        state: get(group.state),
    };
    let after = fix_address(&before);
    for (name, old, new) in [
        (group.line_1, &before.line_1, after.line_1),
        (group.line_2, &before.line_2, after.line_2),
        (group.city, &before.city, after.city),
        (group.state, &before.state, after.state),
    ] {
        if *old != new {
            set_value(report, name, new);
        }
    }
}

fn set_value(report: &mut AutoFixReport, name: &str, value: String) {
    let record = report
        .fields
        .entry(name.to_string())
        .or_insert_with(|| FieldRecord::ocr("", 1.0));
    let original = std::mem::replace(&mut record.value, value.clone());
    report.applied.insert(
        name.to_string(),
        AutoFixEntry {
            original,
            fixed: value,
            status: FixStatus::Fixed,
        },
    );
}

/// The value a field would hold after auto-fix, used to decide whether a
/// manual edit is a real change.
pub fn normalized_value(name: &str, value: &str) -> String {
    let trimmed = value.trim();
    match FieldClass::of(name) {
        Some(FieldClass::Phone | FieldClass::Fax) => {
            let f = fix_phone(trimmed);
            if f.valid {
                f.value
            } else {
                trimmed.to_string()
            }
        }
        Some(FieldClass::Date) => {
            let f = fix_date(trimmed);
            if f.valid {
                f.value
            } else {
                trimmed.to_string()
            }
        }
        Some(FieldClass::Diagnosis) => fix_diagnosis(trimmed),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::names;
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldRecord::ocr(*v, 0.9)))
            .collect()
    }

    #[test]
    fn phone_digits() {
        assert_eq!(
            fix_phone("(732) 849-0077"),
            Fixed {
                value: "7328490077".into(),
                valid: true
            }
        );
        assert!(!fix_phone("732849").valid);
        assert!(!fix_phone("1-732-849-0077").valid);
    }

    #[test]
    fn dates() {
        assert_eq!(fix_date("03/07/1948").value, "1948-03-07");
        assert_eq!(fix_date("1948-3-7").value, "1948-03-07");
        assert_eq!(fix_date("1948/03/07").value, "1948-03-07");
        assert_eq!(fix_date("25/12/2024").value, "2024-12-25");
        let bad = fix_date("02/30/2024");
        assert!(!bad.valid);
        assert_eq!(bad.value, "");
        assert!(!fix_date("next tuesday").valid);
    }

    #[test]
    fn diagnosis_codes() {
        assert_eq!(fix_diagnosis("N39.41,  R32 ,"), "N3941, R32");
        assert_eq!(fix_diagnosis("N3941, R32"), "N3941, R32");
    }

    #[test]
    fn suite_moves_to_line_two() {
        let lines = AddressLines {
            line_1: "1200 Professional Medical Plaza Boulevard East, Suite 300".into(),
            ..Default::default()
        };
        let out = fix_address(&lines);
        assert_eq!(out.line_1, "1200 Professional Medical Plaza Boulevard East");
        assert_eq!(out.line_2, "Suite 300");
    }

    #[test]
    fn short_line_keeps_suite() {
        let lines = AddressLines {
            line_1: "12 Main St Suite 3".into(),
            ..Default::default()
        };
        assert_eq!(fix_address(&lines).line_1, "12 Main St Suite 3");
    }

    #[test]
    fn state_leaves_city_only_when_compatible() {
        let moved = fix_address(&AddressLines {
            city: "Whiting NJ".into(),
            ..Default::default()
        });
        assert_eq!((moved.city.as_str(), moved.state.as_str()), ("Whiting", "NJ"));

        let kept = fix_address(&AddressLines {
            city: "Whiting NJ".into(),
            state: "PA".into(),
            ..Default::default()
        });
        assert_eq!(kept.city, "Whiting NJ");
        assert_eq!(kept.state, "PA");
    }

    #[test]
    fn invalid_phone_left_in_place() {
        let report = auto_fix(&map(&[(names::PROVIDER_PHONE, "732849")]));
        assert_eq!(report.fields[names::PROVIDER_PHONE].value, "732849");
        assert_eq!(report.applied[names::PROVIDER_PHONE].status, FixStatus::Invalid);
        assert!(!report.has_changes());
    }

    #[test]
    fn full_state_name_abbreviated() {
        let report = auto_fix(&map(&[(names::FACILITY_STATE, "New Jersey")]));
        assert_eq!(report.fields[names::FACILITY_STATE].value, "NJ");
        assert_eq!(report.applied[names::FACILITY_STATE].original, "New Jersey");
    }

    #[test]
    fn idempotent() {
        let input = map(&[
            (names::BENEFICIARY_PHONE, "(732) 849-0077"),
            (names::PROVIDER_FAX, "555"),
            (names::BENEFICIARY_DOB, "3/7/1948"),
            (names::DIAGNOSIS_CODES, "N39.41, R32"),
            (names::BENEFICIARY_CITY, "Lakewood NJ"),
            (
                names::PROVIDER_ADDRESS_1,
                "1200 Professional Medical Plaza Boulevard East Ste 300",
            ),
            (names::PROVIDER_STATE, "new jersey"),
        ]);
        let once = auto_fix(&input);
        let twice = auto_fix(&once.fields);
        assert_eq!(once.fields, twice.fields);
        assert!(!twice.has_changes());
    }

    #[test]
    fn normalized_comparison_value() {
        assert_eq!(normalized_value(names::PROVIDER_PHONE, " 732-849-0077 "), "7328490077");
        assert_eq!(normalized_value(names::PROVIDER_NAME, " Acme "), "Acme");
    }
}

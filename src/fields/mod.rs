//! Extracted field model: [`FieldRecord`], its closed tag enums, the field-name
//! vocabulary, and the coarse [`PartType`] classification.
//!
//! A snapshot's fields are a [`FieldMap`] keyed by field name. The vocabulary
//! in [`names`] is what the rules in [`autofix`] and [`validate`] know about;
//! unknown names are carried through untouched.

pub mod autofix;
pub mod states;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name → record. Ordered so that serialised snapshots and validation
/// output are deterministic.
pub type FieldMap = BTreeMap<String, FieldRecord>;

/// Semantic type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    #[default]
    String,
    Date,
    Phone,
    Number,
    Code,
    Checkbox,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Date => "DATE",
            FieldType::Phone => "PHONE",
            FieldType::Number => "NUMBER",
            FieldType::Code => "CODE",
            FieldType::Checkbox => "CHECKBOX",
        }
    }
}

// Unknown tags from the OCR service degrade to STRING.
impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "DATE" => FieldType::Date,
            "PHONE" | "FAX" => FieldType::Phone,
            "NUMBER" | "INTEGER" | "NUMERIC" => FieldType::Number,
            "CODE" => FieldType::Code,
            "CHECKBOX" | "BOOLEAN" => FieldType::Checkbox,
            _ => FieldType::String,
        }
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldSource {
    /// Automatic OCR extraction.
    #[default]
    Ocr,
    /// Typed by a user with no OCR value underneath.
    Manual,
    /// A user correction of an OCR value.
    ManualOnOcr,
    /// OCR re-run on user request.
    OcrManualTrigger,
}

impl FieldSource {
    pub fn is_ocr(&self) -> bool {
        matches!(self, FieldSource::Ocr | FieldSource::OcrManualTrigger)
    }
}

/// One extracted field. This JSON shape is the contract shared with the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    #[serde(default, deserialize_with = "value_as_string")]
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub source: FieldSource,
}

impl FieldRecord {
    pub fn new(value: impl Into<String>, field_type: FieldType, source: FieldSource) -> Self {
        Self {
            value: value.into(),
            confidence: 1.0,
            field_type,
            source,
        }
    }

    /// An OCR value with the engine's confidence, clamped to `0..=1`.
    pub fn ocr(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: clamp_confidence(confidence),
            field_type: FieldType::String,
            source: FieldSource::Ocr,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

pub(crate) fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

fn value_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    })
}

/// Trimmed value of `name`, or `""` when absent.
pub fn field_value<'a>(fields: &'a FieldMap, name: &str) -> &'a str {
    fields.get(name).map(|r| r.value.trim()).unwrap_or("")
}

/// Coarse claim classification that switches some validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartType {
    /// Facility / hospital claims (Part A).
    Institutional,
    /// Practitioner claims (Part B).
    Professional,
    #[default]
    Unknown,
}

impl PartType {
    /// Lenient parse of the forms seen on coversheets and in OCR output.
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_ascii_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "A" | "PARTA" | "INSTITUTIONAL" => PartType::Institutional,
            "B" | "PARTB" | "PROFESSIONAL" => PartType::Professional,
            _ => PartType::Unknown,
        }
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartType::Institutional => "INSTITUTIONAL",
            PartType::Professional => "PROFESSIONAL",
            PartType::Unknown => "UNKNOWN",
        })
    }
}

/// Field-name vocabulary.
pub mod names {
    pub const BENEFICIARY_FIRST_NAME: &str = "beneficiary_first_name";
    pub const BENEFICIARY_LAST_NAME: &str = "beneficiary_last_name";
    pub const BENEFICIARY_MBI: &str = "beneficiary_mbi";
    pub const BENEFICIARY_DOB: &str = "beneficiary_dob";
    pub const BENEFICIARY_ADDRESS_1: &str = "beneficiary_address_1";
    pub const BENEFICIARY_ADDRESS_2: &str = "beneficiary_address_2";
    pub const BENEFICIARY_CITY: &str = "beneficiary_city";
    pub const BENEFICIARY_STATE: &str = "beneficiary_state";
    pub const BENEFICIARY_ZIP: &str = "beneficiary_zip";
    pub const BENEFICIARY_PHONE: &str = "beneficiary_phone";

    pub const PROVIDER_NAME: &str = "provider_name";
    pub const PROVIDER_NPI: &str = "provider_npi";
    pub const PROVIDER_PTAN: &str = "provider_ptan";
    pub const PROVIDER_ADDRESS_1: &str = "provider_address_1";
    pub const PROVIDER_ADDRESS_2: &str = "provider_address_2";
    pub const PROVIDER_CITY: &str = "provider_city";
    pub const PROVIDER_STATE: &str = "provider_state";
    pub const PROVIDER_ZIP: &str = "provider_zip";
    pub const PROVIDER_PHONE: &str = "provider_phone";
    pub const PROVIDER_FAX: &str = "provider_fax";

    pub const FACILITY_NAME: &str = "facility_name";
    pub const FACILITY_NPI: &str = "facility_npi";
    pub const FACILITY_CCN: &str = "facility_ccn";
    pub const FACILITY_ADDRESS_1: &str = "facility_address_1";
    pub const FACILITY_ADDRESS_2: &str = "facility_address_2";
    pub const FACILITY_CITY: &str = "facility_city";
    pub const FACILITY_STATE: &str = "facility_state";
    pub const FACILITY_ZIP: &str = "facility_zip";

    pub const REQUESTER_PHONE: &str = "requester_phone";
    pub const REQUESTER_FAX: &str = "requester_fax";

    pub const REQUEST_TYPE: &str = "request_type";
    pub const SUBMISSION_TYPE: &str = "submission_type";
    pub const PART_TYPE: &str = "part_type";
    pub const DATE_OF_REQUEST: &str = "date_of_request";
    pub const ANTICIPATED_DATE_OF_SERVICE: &str = "anticipated_date_of_service";

    pub const DIAGNOSIS_CODES: &str = "diagnosis_codes";
    pub const PLACE_OF_SERVICE: &str = "place_of_service";
    pub const LOCATION_OF_SERVICE: &str = "location_of_service";

    pub const PROCEDURE_CODE_1: &str = "procedure_code_1";
    pub const PROCEDURE_CODE_2: &str = "procedure_code_2";
    pub const PROCEDURE_CODE_3: &str = "procedure_code_3";
    pub const UNITS_OF_SERVICE_1: &str = "units_of_service_1";
    pub const UNITS_OF_SERVICE_2: &str = "units_of_service_2";
    pub const UNITS_OF_SERVICE_3: &str = "units_of_service_3";

    pub const PROCEDURE_CODES: [&str; 3] = [PROCEDURE_CODE_1, PROCEDURE_CODE_2, PROCEDURE_CODE_3];
    pub const UNITS_OF_SERVICE: [&str; 3] =
        [UNITS_OF_SERVICE_1, UNITS_OF_SERVICE_2, UNITS_OF_SERVICE_3];
    pub const NPI_FIELDS: [&str; 2] = [PROVIDER_NPI, FACILITY_NPI];
    pub const DATE_FIELDS: [&str; 3] = [BENEFICIARY_DOB, DATE_OF_REQUEST, ANTICIPATED_DATE_OF_SERVICE];
    /// States that must match the contractor's jurisdiction.
    pub const JURISDICTION_STATE_FIELDS: [&str; 2] = [PROVIDER_STATE, FACILITY_STATE];
}

/// An address block's four field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressGroup {
    pub line_1: &'static str,
    pub line_2: &'static str,
    pub city: &'static str,
    pub state: &'static str,
}

pub const ADDRESS_GROUPS: [AddressGroup; 3] = [
    AddressGroup {
        line_1: names::BENEFICIARY_ADDRESS_1,
        line_2: names::BENEFICIARY_ADDRESS_2,
        city: names::BENEFICIARY_CITY,
        state: names::BENEFICIARY_STATE,
    },
    AddressGroup {
        line_1: names::PROVIDER_ADDRESS_1,
        line_2: names::PROVIDER_ADDRESS_2,
        city: names::PROVIDER_CITY,
        state: names::PROVIDER_STATE,
    },
    AddressGroup {
        line_1: names::FACILITY_ADDRESS_1,
        line_2: names::FACILITY_ADDRESS_2,
        city: names::FACILITY_CITY,
        state: names::FACILITY_STATE,
    },
];

/// Clean-up / validation class of a field, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Phone,
    Fax,
    Date,
    Diagnosis,
    Npi,
}

impl FieldClass {
    pub fn of(name: &str) -> Option<Self> {
        if name.ends_with("_fax") || name == "fax" {
            Some(FieldClass::Fax)
        } else if name.ends_with("_phone") || name == "phone" {
            Some(FieldClass::Phone)
        } else if names::DATE_FIELDS.contains(&name) || name.ends_with("_date") {
            Some(FieldClass::Date)
        } else if name == names::DIAGNOSIS_CODES {
            Some(FieldClass::Diagnosis)
        } else if names::NPI_FIELDS.contains(&name) {
            Some(FieldClass::Npi)
        } else {
            None
        }
    }

    /// The [`FieldType`] a manual entry of this class is tagged with.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldClass::Phone | FieldClass::Fax => FieldType::Phone,
            FieldClass::Date => FieldType::Date,
            FieldClass::Diagnosis => FieldType::Code,
            FieldClass::Npi => FieldType::Number,
        }
    }
}

//! Data model: the structured registration form, the stored application
//! record, and the document-service output the mapper reads.
//!
//! Field names on the wire follow the registration form template exactly
//! (`HeadOfFamily`, `voterID`, `HOFAdhaar`, …), so drafts written by this
//! crate stay interchangeable with the adjudication tooling that reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Leaf values ──────────────────────────────────────────────────────────

/// One extracted value and how sure the extraction is about it.
///
/// Confidence `0.0` means "not populated". The field itself is never omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: T,
    pub confidence: f64,
}

impl<T> Field<T> {
    pub fn new(value: T, confidence: f64) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl Field<String> {
    /// An unpopulated text field.
    pub fn blank() -> Self {
        Self::new(String::new(), 0.0)
    }
}

// ── Form sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadOfFamily {
    pub name: Field<String>,
    pub father_or_husband_name: Field<String>,
    #[serde(rename = "voterID")]
    pub voter_id: Field<String>,
    pub aadhaar_number: Field<String>,
    pub gender: Field<String>,
    pub age: Field<u32>,
    pub qualification: Field<String>,
    pub occupation: Field<String>,
    pub address: Field<String>,
    pub ward: Field<String>,
    pub mobile_number: Field<String>,
    pub namaz_masjid: Field<String>,
}

/// A dependant listed on the form. Populated during adjudication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    pub name: Field<String>,
    #[serde(rename = "relationWithHOF")]
    pub relation_with_hof: Field<String>,
    pub age: Field<u32>,
    pub gender: Field<String>,
    #[serde(rename = "voterID")]
    pub voter_id: Field<String>,
    pub aadhaar_number: Field<String>,
    pub occupation: Field<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChecklist {
    #[serde(rename = "HOFVoterID")]
    pub hof_voter_id: Field<bool>,
    #[serde(rename = "HOFAdhaar")]
    pub hof_aadhaar: Field<bool>,
    #[serde(rename = "FamilyMemberAdultsVoterID")]
    pub family_member_adults_voter_id: Field<bool>,
    #[serde(rename = "FamilyMemberMinorsAdhaar")]
    pub family_member_minors_aadhaar: Field<bool>,
    #[serde(rename = "OtherDocuments", default)]
    pub other_documents: Vec<Field<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalDeclaration {
    pub consent_to_registration: Field<bool>,
    pub truthfulness_of_information: Field<bool>,
    #[serde(rename = "responsibilityAcceptedByHOF")]
    pub responsibility_accepted_by_hof: Field<bool>,
    #[serde(rename = "signatureOfHOF")]
    pub signature_of_hof: Field<String>,
    pub date_signed: Field<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgementSlip {
    pub name_of_head_of_family: Field<String>,
    pub received_by: Field<String>,
    pub office_seal_signature: Field<String>,
    pub date_received: Field<String>,
}

/// The fixed registration form schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StructuredForm {
    pub head_of_family: HeadOfFamily,
    #[serde(default)]
    pub family_members: Vec<FamilyMember>,
    pub document_checklist: DocumentChecklist,
    pub legal_declaration: LegalDeclaration,
    pub acknowledgement_slip: AcknowledgementSlip,
}

// ── Stored record ────────────────────────────────────────────────────────

/// Review state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Freshly extracted, awaiting human adjudication. (default)
    #[default]
    Draft,
    /// Checked and corrected by a reviewer.
    Reviewed,
}

impl RecordStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Reviewed => "reviewed",
        }
    }
}

/// Bookkeeping attached to every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub app_id: u64,
    /// The assembled application PDF the record was extracted from.
    pub source_pdf: PathBuf,
    pub status: RecordStatus,
    #[serde(with = "utc_seconds")]
    pub processing_started: DateTime<Utc>,
    #[serde(with = "utc_seconds")]
    pub processing_completed: DateTime<Utc>,
}

/// One application as written to the drafts directory and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub app_id: u64,
    #[serde(rename = "AnjumanRegistrationForm")]
    pub form: StructuredForm,
    pub metadata: RecordMetadata,
}

impl ApplicationRecord {
    /// Head-of-family name reduced to characters safe in a file name.
    ///
    /// Alphanumerics, spaces and underscores survive; everything else becomes
    /// `_`; surrounding whitespace is trimmed and inner spaces become `_`.
    /// An empty result falls back to `HOF`.
    pub fn safe_hof_name(&self) -> String {
        let raw = &self.form.head_of_family.name.value;
        let cleaned: String = raw
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == ' ' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = cleaned.trim().replace(' ', "_");
        if safe.is_empty() {
            "HOF".to_string()
        } else {
            safe
        }
    }

    /// File name of this record's draft, e.g. `application_1001_Abdul_Karim.json`.
    pub fn draft_file_name(&self) -> String {
        format!("application_{}_{}.json", self.app_id, self.safe_hof_name())
    }

    /// File name of this record's rendered report.
    pub fn report_file_name(&self) -> String {
        report_file_name(self.app_id)
    }
}

/// File name of the rendered report for `app_id`.
pub fn report_file_name(app_id: u64) -> String {
    format!("application_{app_id}_report.pdf")
}

/// Serialise timestamps as `YYYY-MM-DDTHH:MM:SSZ`, second precision.
mod utc_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

// ── Document-service output ──────────────────────────────────────────────

/// A typed span recognised by the document service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrEntity {
    #[serde(rename = "type", alias = "type_", default)]
    pub entity_type: String,
    #[serde(rename = "mentionText", alias = "mention_text", default)]
    pub mention_text: String,
    /// Absent when the service did not score the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The parts of a processed document the mapper reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<OcrEntity>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOcrPayload {
    Wrapped { document: OcrDocument },
    Bare(OcrDocument),
}

impl OcrDocument {
    /// Parse a persisted service response.
    ///
    /// Accepts both the bare document and the `{"document": …}` envelope
    /// returned by the `:process` call.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str::<RawOcrPayload>(raw)? {
            RawOcrPayload::Wrapped { document } => document,
            RawOcrPayload::Bare(document) => document,
        })
    }
}

//! Field mapping: document-service output → [`StructuredForm`].
//!
//! The mapper is a pure function of its input. Identical OCR output always
//! produces identical forms; nothing is cached between calls.
//!
//! ## Algorithm
//!
//! 1. The OCR full text is the search space, matched ASCII-case-insensitively.
//! 2. Each head-of-family field has an ordered alias list. The
//!    [`FieldExtractor`] strategy turns `(text, aliases)` into a value; the
//!    default [`WindowExtractor`] takes a 120-character window at the first
//!    alias hit and reads what follows the colon on that line.
//! 3. Confidence comes from the service's entity of the field's canonical
//!    type when one exists, otherwise from the field's default constant.
//! 4. Checklist, declaration and acknowledgement fields are constant
//!    placeholders pending human adjudication.

use crate::config::{IntakeConfig, DEFAULT_FOOTER_PATTERNS};
use crate::error::IntakeError;
use crate::schema::{
    AcknowledgementSlip, DocumentChecklist, Field, HeadOfFamily, LegalDeclaration, OcrDocument,
    StructuredForm,
};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Characters read after an alias hit.
pub const WINDOW_CHARS: usize = 120;

/// Confidence assumed for an entity the service returned without a score.
pub const UNSCORED_ENTITY_CONFIDENCE: f64 = 0.85;

/// Confidence of the constant document-checklist answers.
pub const CHECKLIST_CONFIDENCE: f64 = 0.95;
/// Confidence of the constant legal-declaration answers.
pub const DECLARATION_CONFIDENCE: f64 = 0.99;
/// Confidence of the signature copied from the extracted name.
pub const SIGNATURE_CONFIDENCE: f64 = 0.97;
/// Confidence of the acknowledgement-slip name copied from the extracted name.
pub const SLIP_NAME_CONFIDENCE: f64 = 0.98;

/// How one head-of-family field is located and scored.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Key of the field in the form template.
    pub key: &'static str,
    /// Labels tried in order.
    pub aliases: &'static [&'static str],
    /// Entity type (lower-case) whose confidence applies to this field.
    pub entity_type: &'static str,
    /// Confidence used when no entity of `entity_type` was returned.
    pub default_confidence: f64,
}

const fn spec(
    key: &'static str,
    aliases: &'static [&'static str],
    entity_type: &'static str,
    default_confidence: f64,
) -> FieldSpec {
    FieldSpec {
        key,
        aliases,
        entity_type,
        default_confidence,
    }
}

pub const NAME: FieldSpec = spec("name", &["Name", "Head of Family"], "name", 0.9999);
pub const FATHER_OR_HUSBAND: FieldSpec =
    spec("fatherOrHusbandName", &["Father", "Husband"], "father", 0.9);
pub const VOTER_ID: FieldSpec = spec("voterID", &["Voter ID", "EPIC"], "voterid", 0.9);
pub const AADHAAR: FieldSpec = spec("aadhaarNumber", &["Aadhaar", "Aadhar"], "aadhaar", 0.9);
pub const GENDER: FieldSpec = spec("gender", &["Gender", "Sex"], "gender", 0.9);
pub const AGE: FieldSpec = spec("age", &["Age"], "age", 0.9);
pub const QUALIFICATION: FieldSpec =
    spec("qualification", &["Qualification", "Education"], "qualification", 0.9);
pub const OCCUPATION: FieldSpec = spec("occupation", &["Occupation", "Work"], "occupation", 0.9);
pub const ADDRESS: FieldSpec = spec("address", &["Address"], "address", 0.9);
pub const WARD: FieldSpec = spec("ward", &["Ward"], "ward", 0.9);
pub const MOBILE: FieldSpec = spec("mobileNumber", &["Mobile", "Phone"], "mobile", 0.9);
pub const MASJID: FieldSpec = spec("namazMasjid", &["Masjid", "Namaz"], "masjid", 0.9);

/// Every extracted head-of-family field, in template order.
pub const HOF_FIELDS: [FieldSpec; 12] = [
    NAME,
    FATHER_OR_HUSBAND,
    VOTER_ID,
    AADHAAR,
    GENDER,
    AGE,
    QUALIFICATION,
    OCCUPATION,
    ADDRESS,
    WARD,
    MOBILE,
    MASJID,
];

// ── Extraction strategy ──────────────────────────────────────────────────

/// A value found in the OCR text, and the alias that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub value: String,
    pub alias: String,
}

/// Strategy that pulls one field's value out of raw OCR text.
///
/// Swap in a stronger strategy through [`FieldMapper::with_extractor`]; the
/// orchestrator never sees the difference.
pub trait FieldExtractor: Send + Sync {
    /// Return the value for the first alias that yields one, or `None`.
    fn extract(&self, text: &str, aliases: &[&str]) -> Option<Extraction>;
}

/// Label-and-colon heuristic over a fixed window of characters.
#[derive(Debug, Clone, Copy)]
pub struct WindowExtractor {
    pub window_chars: usize,
}

impl Default for WindowExtractor {
    fn default() -> Self {
        Self {
            window_chars: WINDOW_CHARS,
        }
    }
}

impl FieldExtractor for WindowExtractor {
    fn extract(&self, text: &str, aliases: &[&str]) -> Option<Extraction> {
        // ASCII lowering keeps byte offsets aligned with `text`.
        let lowered = text.to_ascii_lowercase();
        for alias in aliases {
            let Some(idx) = lowered.find(&alias.to_ascii_lowercase()) else {
                continue;
            };
            let window: String = text[idx..].chars().take(self.window_chars).collect();
            let mut parts = window.split(':');
            parts.next();
            // A label without a colon in reach falls through to the next alias.
            if let Some(after_colon) = parts.next() {
                let value = after_colon.split('\n').next().unwrap_or_default().trim();
                return Some(Extraction {
                    value: value.to_string(),
                    alias: alias.to_string(),
                });
            }
        }
        None
    }
}

// ── Provenance ───────────────────────────────────────────────────────────

/// How a form was derived from the OCR output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Number of entities the service returned.
    pub total_entities: usize,
    /// Field key → alias that produced its value.
    pub matched_aliases: BTreeMap<String, String>,
    /// Field key → where its confidence came from (`entity` or `default`).
    pub confidence_sources: BTreeMap<String, ConfidenceSource>,
    /// Extracted fields scoring below the review threshold.
    pub low_confidence_fields: Vec<String>,
    /// Form footer markers found in the text, in order of appearance.
    pub footer_markers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceSource {
    Entity,
    Default,
}

// ── Mapper ───────────────────────────────────────────────────────────────

static DEFAULT_FOOTERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    DEFAULT_FOOTER_PATTERNS
        .iter()
        .filter_map(|p| compile_footer(p).ok())
        .collect()
});

fn compile_footer(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Maps [`OcrDocument`]s onto the registration form.
pub struct FieldMapper {
    extractor: Box<dyn FieldExtractor>,
    confidence_threshold: f64,
    footer_patterns: Vec<Regex>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self {
            extractor: Box::new(WindowExtractor::default()),
            confidence_threshold: 0.75,
            footer_patterns: DEFAULT_FOOTERS.clone(),
        }
    }
}

impl std::fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMapper")
            .field("extractor", &"<dyn FieldExtractor>")
            .field("confidence_threshold", &self.confidence_threshold)
            .field("footer_patterns", &self.footer_patterns.len())
            .finish()
    }
}

impl FieldMapper {
    /// Mapper using the thresholds and footer patterns of `config`.
    pub fn from_config(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let footer_patterns = config
            .footer_patterns
            .iter()
            .map(|p| {
                compile_footer(p).map_err(|e| {
                    IntakeError::InvalidConfig(format!("Invalid footer pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            extractor: Box::new(WindowExtractor::default()),
            confidence_threshold: config.confidence_threshold,
            footer_patterns,
        })
    }

    /// Replace the extraction strategy.
    pub fn with_extractor(mut self, extractor: Box<dyn FieldExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Map one OCR document onto the form template.
    pub fn map(&self, doc: &OcrDocument) -> (StructuredForm, Provenance) {
        let confidences: HashMap<String, f64> = doc
            .entities
            .iter()
            .map(|e| {
                (
                    e.entity_type.to_lowercase(),
                    e.confidence.unwrap_or(UNSCORED_ENTITY_CONFIDENCE),
                )
            })
            .collect();

        let mut provenance = Provenance {
            total_entities: doc.entities.len(),
            footer_markers: self.footer_markers(&doc.text),
            ..Default::default()
        };

        let mut resolve = |spec: &FieldSpec| -> Field<String> {
            let value = match self.extractor.extract(&doc.text, spec.aliases) {
                Some(found) => {
                    provenance
                        .matched_aliases
                        .insert(spec.key.to_string(), found.alias);
                    found.value
                }
                None => String::new(),
            };
            let (confidence, source) = match confidences.get(spec.entity_type) {
                Some(c) => (*c, ConfidenceSource::Entity),
                None => (spec.default_confidence, ConfidenceSource::Default),
            };
            provenance
                .confidence_sources
                .insert(spec.key.to_string(), source);
            if confidence < self.confidence_threshold {
                provenance.low_confidence_fields.push(spec.key.to_string());
            }
            Field::new(value, confidence)
        };

        let name = resolve(&NAME);
        let age_text = resolve(&AGE);
        let head_of_family = HeadOfFamily {
            father_or_husband_name: resolve(&FATHER_OR_HUSBAND),
            voter_id: resolve(&VOTER_ID),
            aadhaar_number: resolve(&AADHAAR),
            gender: resolve(&GENDER),
            age: Field::new(parse_numeric(&age_text.value), age_text.confidence),
            qualification: resolve(&QUALIFICATION),
            occupation: resolve(&OCCUPATION),
            address: resolve(&ADDRESS),
            ward: resolve(&WARD),
            mobile_number: resolve(&MOBILE),
            namaz_masjid: resolve(&MASJID),
            name: name.clone(),
        };

        let form = StructuredForm {
            head_of_family,
            family_members: Vec::new(),
            document_checklist: DocumentChecklist {
                hof_voter_id: Field::new(true, CHECKLIST_CONFIDENCE),
                hof_aadhaar: Field::new(true, CHECKLIST_CONFIDENCE),
                family_member_adults_voter_id: Field::new(true, CHECKLIST_CONFIDENCE),
                family_member_minors_aadhaar: Field::new(true, CHECKLIST_CONFIDENCE),
                other_documents: Vec::new(),
            },
            legal_declaration: LegalDeclaration {
                consent_to_registration: Field::new(true, DECLARATION_CONFIDENCE),
                truthfulness_of_information: Field::new(true, DECLARATION_CONFIDENCE),
                responsibility_accepted_by_hof: Field::new(true, DECLARATION_CONFIDENCE),
                signature_of_hof: Field::new(name.value.clone(), SIGNATURE_CONFIDENCE),
                date_signed: Field::blank(),
            },
            acknowledgement_slip: AcknowledgementSlip {
                name_of_head_of_family: Field::new(name.value, SLIP_NAME_CONFIDENCE),
                received_by: Field::blank(),
                office_seal_signature: Field::blank(),
                date_received: Field::blank(),
            },
        };

        debug!(
            "Mapped form fields: {} entities, {} aliases matched, {} low-confidence",
            provenance.total_entities,
            provenance.matched_aliases.len(),
            provenance.low_confidence_fields.len()
        );
        (form, provenance)
    }

    fn footer_markers(&self, text: &str) -> Vec<String> {
        let mut markers: Vec<String> = Vec::new();
        for re in &self.footer_patterns {
            for m in re.find_iter(text) {
                let marker = m.as_str().trim().to_string();
                if !markers.contains(&marker) {
                    markers.push(marker);
                }
            }
        }
        markers
    }
}

/// Purely numeric text parses; anything else (including "") yields 0.
fn parse_numeric(text: &str) -> u32 {
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().unwrap_or(0)
    } else {
        0
    }
}

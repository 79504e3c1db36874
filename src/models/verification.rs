use std::fmt;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Venezuelan document nationality prefix.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum DocumentType {
    #[default]
    V,
    E,
}

/// Canonical identifier a verification runs against: document type plus
/// cédula digits with leading zeros stripped. Equivalent raw inputs
/// ("  0012345678", "12345678") collapse to the same key, which is what
/// the cache and queue are keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationKey {
    pub document_type: DocumentType,
    pub cedula: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("cédula must be 6-10 digits")]
    InvalidCedula,
}

impl VerificationKey {
    pub fn new(document_type: DocumentType, cedula: &str) -> Result<Self, KeyError> {
        let trimmed = cedula.trim();
        if !(6..=10).contains(&trimmed.len()) || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeyError::InvalidCedula);
        }
        let canonical = trimmed.trim_start_matches('0');
        if canonical.is_empty() {
            return Err(KeyError::InvalidCedula);
        }
        Ok(Self {
            document_type,
            cedula: canonical.to_string(),
        })
    }
}

impl fmt::Display for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.document_type, self.cedula)
    }
}

/// One row of the SACS professions table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessionRecord {
    pub profession: String,
    pub license: String,
    pub registered_at: String,
    pub tome: String,
    pub folio: String,
    #[serde(default)]
    pub has_postgraduate: bool,
}

/// One row of the SACS postgraduate table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgraduateRecord {
    pub degree: String,
    pub registered_at: String,
    pub tome: String,
    pub folio: String,
}

/// Why a verification did not approve the professional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    #[serde(rename = "NO_REGISTRADO_SACS")]
    NotRegistered,
    #[serde(rename = "MEDICO_VETERINARIO")]
    VeterinaryProfessional,
    #[serde(rename = "PROFESION_NO_HABILITADA")]
    ProfessionNotEnabled,
}

/// Outcome of a completed verification. Immutable once produced; this is
/// the value the result cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub found: bool,
    pub verified: bool,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub professions: Vec<ProfessionRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub postgraduates: Vec<PostgraduateRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_profession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_profession: Option<String>,
    pub is_human_medical_profession: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    pub message: String,
    pub extracted_at: DateTime<Utc>,
}

/// Occupancy of the admission queue and worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
}

/// Request body for POST /verify.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[garde(custom(cedula_format))]
    pub cedula: String,

    #[garde(skip)]
    #[serde(default)]
    pub document_type: DocumentType,
}

fn cedula_format(value: &str, _ctx: &()) -> garde::Result {
    let trimmed = value.trim();
    if !(6..=10).contains(&trimmed.len()) || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(garde::Error::new("must be 6-10 digits"));
    }
    Ok(())
}

/// Response body for POST /verify.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub found: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VerificationResult>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub cached: bool,
    pub ms: u64,
    pub queue: QueueSnapshot,
}

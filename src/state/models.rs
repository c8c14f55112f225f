/// Database models for mediledger.
///
/// These structs map directly to PostgreSQL tables and are used
/// for both reading and writing via sqlx.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::crypto::hash::{generate_hash, DocumentHash, HashableFields};
use crate::error::MediError;

/// Clinical document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_type", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    Prescription,
    LabReport,
    Xray,
    Mri,
    CtScan,
    DoctorNote,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Prescription => "prescription",
            DocumentType::LabReport => "lab-report",
            DocumentType::Xray => "xray",
            DocumentType::Mri => "mri",
            DocumentType::CtScan => "ct-scan",
            DocumentType::DoctorNote => "doctor-note",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = MediError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prescription" => Ok(DocumentType::Prescription),
            "lab-report" => Ok(DocumentType::LabReport),
            "xray" => Ok(DocumentType::Xray),
            "mri" => Ok(DocumentType::Mri),
            "ct-scan" => Ok(DocumentType::CtScan),
            "doctor-note" => Ok(DocumentType::DoctorNote),
            "other" => Ok(DocumentType::Other),
            _ => Err(MediError::InvalidInput(format!("unknown document type `{s}`"))),
        }
    }
}

/// OCR processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ocr_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Where a document stands relative to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorState {
    /// No successful registration recorded.
    Unanchored,
    /// Registered, and the stored hash still matches the document fields.
    Anchored,
    /// Registered, but the hashable fields changed afterwards.
    Stale,
}

/// A medical document record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    /// Uploading user.
    pub owner_id: Uuid,
    pub title: String,
    pub document_type: DocumentType,

    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,

    pub patient_name: Option<String>,
    pub patient_age: Option<String>,
    pub patient_gender: Option<String>,
    pub doctor_name: Option<String>,
    pub hospital_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub diagnosis: Option<String>,
    pub medicines: Vec<String>,
    pub symptoms: Vec<String>,
    pub tests: Vec<String>,

    pub ocr_text: Option<String>,
    pub ocr_status: OcrStatus,
    pub ocr_confidence: Option<f64>,

    /// Content fingerprint (64 lowercase hex chars).
    pub ledger_hash: Option<String>,
    /// Transaction reference returned by the ledger.
    pub ledger_tx_ref: Option<String>,
    /// Local cache of "registration succeeded".
    pub ledger_verified: bool,
    /// Time of the last successful registration.
    pub anchored_at: Option<DateTime<Utc>>,

    pub is_private: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A fresh record with every optional field empty.
    pub fn new(owner_id: Uuid, title: impl Into<String>, document_type: DocumentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id,
            title: title.into(),
            document_type,
            file_name: None,
            file_url: None,
            file_size: None,
            mime_type: None,
            patient_name: None,
            patient_age: None,
            patient_gender: None,
            doctor_name: None,
            hospital_name: None,
            date: None,
            notes: None,
            diagnosis: None,
            medicines: Vec::new(),
            symptoms: Vec::new(),
            tests: Vec::new(),
            ocr_text: None,
            ocr_status: OcrStatus::Pending,
            ocr_confidence: None,
            ledger_hash: None,
            ledger_tx_ref: None,
            ledger_verified: false,
            anchored_at: None,
            is_private: true,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn hashable_fields(&self) -> HashableFields<'_> {
        HashableFields {
            title: Some(&self.title),
            document_type: Some(self.document_type.as_str()),
            ocr_text: self.ocr_text.as_deref(),
            date: self.date,
            doctor_name: self.doctor_name.as_deref(),
            hospital_name: self.hospital_name.as_deref(),
        }
    }

    /// Hash of the current field values, ignoring whatever is stored.
    pub fn compute_hash(&self) -> DocumentHash {
        generate_hash(&self.hashable_fields())
    }

    /// The stored fingerprint, if one was persisted and is well-formed.
    pub fn stored_hash(&self) -> Option<DocumentHash> {
        self.ledger_hash.as_deref().and_then(|h| h.parse().ok())
    }

    pub fn anchor_state(&self) -> AnchorState {
        if self.ledger_tx_ref.is_none() || !self.ledger_verified {
            return AnchorState::Unanchored;
        }
        match self.stored_hash() {
            Some(stored) if stored == self.compute_hash() => AnchorState::Anchored,
            _ => AnchorState::Stale,
        }
    }
}

/// The four anchoring fields, written together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorRecord {
    pub hash: DocumentHash,
    pub tx_ref: String,
    pub verified: bool,
    pub anchored_at: DateTime<Utc>,
}

/// Sort orders accepted by document listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentSort {
    #[default]
    NewestFirst,
    OldestFirst,
    DateDesc,
    DateAsc,
    TitleAsc,
    TitleDesc,
}

impl DocumentSort {
    /// SQL ORDER BY clause. Only these fixed strings ever reach a query.
    pub fn order_by(&self) -> &'static str {
        match self {
            DocumentSort::NewestFirst => "created_at DESC",
            DocumentSort::OldestFirst => "created_at ASC",
            DocumentSort::DateDesc => "date DESC NULLS LAST, created_at DESC",
            DocumentSort::DateAsc => "date ASC NULLS LAST, created_at ASC",
            DocumentSort::TitleAsc => "title ASC",
            DocumentSort::TitleDesc => "title DESC",
        }
    }
}

impl FromStr for DocumentSort {
    type Err = MediError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "-createdAt" => Ok(DocumentSort::NewestFirst),
            "createdAt" => Ok(DocumentSort::OldestFirst),
            "-date" => Ok(DocumentSort::DateDesc),
            "date" => Ok(DocumentSort::DateAsc),
            "title" => Ok(DocumentSort::TitleAsc),
            "-title" => Ok(DocumentSort::TitleDesc),
            _ => Err(MediError::InvalidInput(format!("unsupported sort `{s}`"))),
        }
    }
}

/// Filter for listing a user's documents.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    pub document_type: Option<DocumentType>,
    pub sort: DocumentSort,
    pub limit: i64,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            document_type: None,
            sort: DocumentSort::default(),
            limit: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(doc: &mut Document) {
        doc.ledger_hash = Some(doc.compute_hash().to_string());
        doc.ledger_tx_ref = Some("0x01".into());
        doc.ledger_verified = true;
        doc.anchored_at = Some(Utc::now());
    }

    #[test]
    fn test_anchor_state_transitions() {
        let mut doc = Document::new(Uuid::now_v7(), "Blood Test", DocumentType::LabReport);
        assert_eq!(doc.anchor_state(), AnchorState::Unanchored);

        anchored(&mut doc);
        assert_eq!(doc.anchor_state(), AnchorState::Anchored);

        doc.ocr_text = Some("Glucose 120".into());
        assert_eq!(doc.anchor_state(), AnchorState::Stale);
    }

    #[test]
    fn test_non_hashable_edit_keeps_anchor() {
        let mut doc = Document::new(Uuid::now_v7(), "X-ray", DocumentType::Xray);
        anchored(&mut doc);
        doc.notes = Some("follow up in 6 weeks".into());
        doc.tags.push("chest".into());
        doc.file_size = Some(1024);
        assert_eq!(doc.anchor_state(), AnchorState::Anchored);
    }

    #[test]
    fn test_document_type_round_trips_through_str() {
        for ty in [
            DocumentType::Prescription,
            DocumentType::LabReport,
            DocumentType::Xray,
            DocumentType::Mri,
            DocumentType::CtScan,
            DocumentType::DoctorNote,
            DocumentType::Other,
        ] {
            assert_eq!(ty.as_str().parse::<DocumentType>().unwrap(), ty);
            assert_eq!(serde_json::to_value(ty).unwrap(), ty.as_str());
        }
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("-createdAt".parse::<DocumentSort>().unwrap(), DocumentSort::NewestFirst);
        assert_eq!("-date".parse::<DocumentSort>().unwrap(), DocumentSort::DateDesc);
        assert!("createdAt; DROP TABLE documents".parse::<DocumentSort>().is_err());
    }
}

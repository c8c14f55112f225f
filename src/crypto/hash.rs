/// SHA-256 content fingerprints for medical documents.
///
/// Only six clinically-material fields participate in the hash. File bytes,
/// notes, tags and every other attribute are left out, so the
/// fingerprint tracks what the document says rather than how it was stored.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{MediError, Result};

/// A 32-byte SHA-256 digest, displayed as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHash([u8; 32]);

impl DocumentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentHash({self})")
    }
}

impl FromStr for DocumentHash {
    type Err = MediError;

    /// Accepts 64 hex characters in any case, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 64 {
            return Err(MediError::InvalidInput(format!(
                "hash must be 64 hex characters, got {}",
                digits.len()
            )));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| MediError::InvalidInput(format!("hash is not valid hex: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for DocumentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DocumentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The canonical, ordered set of fields that make up a document fingerprint.
///
/// Field order and key names are part of the hash format. Absent values
/// serialize as `null` so "missing" and "empty" stay distinguishable.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashableFields<'a> {
    pub title: Option<&'a str>,
    pub document_type: Option<&'a str>,
    pub ocr_text: Option<&'a str>,
    pub date: Option<NaiveDate>,
    pub doctor_name: Option<&'a str>,
    pub hospital_name: Option<&'a str>,
}

impl<'a> HashableFields<'a> {
    /// Read the six fields out of a loosely-typed JSON document.
    ///
    /// Keys outside the six are ignored. `date` may be a plain date or an
    /// RFC 3339 timestamp; only its calendar date is kept.
    pub fn from_json(value: &'a serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| MediError::InvalidInput("document must be a JSON object".into()))?;

        let text = |key: &str| -> Result<Option<&'a str>> {
            match obj.get(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
                Some(other) => Err(MediError::InvalidInput(format!(
                    "field `{key}` must be a string, got {other}"
                ))),
            }
        };

        let date = match text("date")? {
            Some(raw) => Some(parse_date(raw)?),
            None => None,
        };

        Ok(Self {
            title: text("title")?,
            document_type: text("documentType")?,
            ocr_text: text("ocrText")?,
            date,
            doctor_name: text("doctorName")?,
            hospital_name: text("hospitalName")?,
        })
    }
}

/// Calendar date from `YYYY-MM-DD` or an RFC 3339 timestamp.
///
/// A timestamp keeps the calendar date of its own offset.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    if raw.len() == 10 {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| MediError::InvalidInput(format!("invalid date `{raw}`: {e}")));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.date_naive())
        .map_err(|e| MediError::InvalidInput(format!("invalid date `{raw}`: {e}")))
}

/// Fingerprint the canonical fields with SHA-256.
pub fn generate_hash(fields: &HashableFields<'_>) -> DocumentHash {
    // Serializing a struct of strings and dates into a Vec cannot fail.
    let canonical = serde_json::to_vec(fields).unwrap_or_default();
    DocumentHash(Sha256::digest(&canonical).into())
}

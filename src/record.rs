//! Identity data model: canonical fields, asset locators and the persisted record.
//!
//! [`CanonicalIdentityFields`] is what the normaliser produces from a provider
//! prediction. [`IdentityRecord`] is what the record store holds: the fields,
//! the public locators of every uploaded asset, and a verification status that
//! starts at [`VerificationStatus::Pending`] and is only moved on by an
//! external reviewer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity attributes extracted from a document, independent of provider naming.
///
/// Every attribute is optional. An attribute is `None` when none of its
/// provider aliases carried a usable value; it is never `Some("")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalIdentityFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nationality: Option<String>,
    pub document_number: Option<String>,
    pub date_of_birth: Option<String>,
    pub sex: Option<String>,
    pub expiry_date: Option<String>,
    pub issuing_country: Option<String>,
    /// First machine-readable-zone line, verbatim.
    pub machine_readable_line_1: Option<String>,
    /// Second machine-readable-zone line, verbatim.
    pub machine_readable_line_2: Option<String>,
}

impl CanonicalIdentityFields {
    /// Number of populated attributes.
    pub fn populated(&self) -> usize {
        [
            &self.first_name,
            &self.last_name,
            &self.nationality,
            &self.document_number,
            &self.date_of_birth,
            &self.sex,
            &self.expiry_date,
            &self.issuing_country,
            &self.machine_readable_line_1,
            &self.machine_readable_line_2,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

/// Review state of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!(
                "unknown verification status '{other}' (expected pending, verified or rejected)"
            )),
        }
    }
}

/// Kind of binary artifact produced by one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// The full document photograph. Its upload is required.
    DocumentScan,
    FaceCrop,
    SignatureCrop,
    /// The companion selfie, when one was captured.
    Selfie,
}

impl AssetKind {
    /// Prefix used in generated object names.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::DocumentScan => "document_scan",
            AssetKind::FaceCrop => "face_crop",
            AssetKind::SignatureCrop => "signature_crop",
            AssetKind::Selfie => "selfie",
        }
    }

    /// Only the document scan aborts a run when its upload fails.
    pub fn is_required(&self) -> bool {
        matches!(self, AssetKind::DocumentScan)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded artifact waiting to be uploaded.
///
/// The bytes are consumed by the upload; only the resulting locator outlives it.
#[derive(Debug, Clone)]
pub struct DerivedAsset {
    pub kind: AssetKind,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

impl DerivedAsset {
    pub fn jpeg(kind: AssetKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            content_type: "image/jpeg",
        }
    }
}

/// Public locators produced by the asset uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLocators {
    /// Always present: the run fails before persistence otherwise.
    pub document_url: String,
    pub face_url: Option<String>,
    pub signature_url: Option<String>,
    pub selfie_url: Option<String>,
}

/// The values written by a single insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentityRecord {
    #[serde(flatten)]
    pub fields: CanonicalIdentityFields,
    pub document_scan_url: Option<String>,
    pub face_photo_url: Option<String>,
    pub signature_url: Option<String>,
    pub selfie_url: Option<String>,
    pub submitted_by: Option<String>,
}

impl NewIdentityRecord {
    pub fn new(
        fields: CanonicalIdentityFields,
        locators: &AssetLocators,
        submitted_by: Option<String>,
    ) -> Self {
        Self {
            fields,
            document_scan_url: Some(locators.document_url.clone()),
            face_photo_url: locators.face_url.clone(),
            signature_url: locators.signature_url.clone(),
            selfie_url: locators.selfie_url.clone(),
            submitted_by,
        }
    }
}

/// A persisted identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Assigned by the store on insert; increases with every insert.
    pub id: i64,
    #[serde(flatten)]
    pub fields: CanonicalIdentityFields,
    pub document_scan_url: Option<String>,
    pub face_photo_url: Option<String>,
    pub signature_url: Option<String>,
    pub selfie_url: Option<String>,
    pub verification_status: VerificationStatus,
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Materialise a freshly inserted row. New rows always start at `pending`.
    pub fn from_insert(id: i64, new: NewIdentityRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fields: new.fields,
            document_scan_url: new.document_scan_url,
            face_photo_url: new.face_photo_url,
            signature_url: new.signature_url,
            selfie_url: new.selfie_url,
            verification_status: VerificationStatus::Pending,
            submitted_by: new.submitted_by,
            created_at,
        }
    }
}

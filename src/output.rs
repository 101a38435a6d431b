//! Result types returned by a successful ingestion run.

use crate::error::StageError;
use crate::pipeline::extract::ProviderPrediction;
use crate::record::IdentityRecord;
use serde::Serialize;

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutput {
    /// The record as inserted, status `pending`.
    pub record: IdentityRecord,

    /// Non-fatal crop and upload failures, in the order they occurred.
    pub warnings: Vec<StageError>,

    pub stats: IngestionStats,

    /// The raw prediction the record was normalised from. Kept for audit
    /// trails; skipped when serialising the output.
    #[serde(skip)]
    pub prediction: ProviderPrediction,
}

impl IngestionOutput {
    pub fn has_face(&self) -> bool {
        self.record.face_photo_url.is_some()
    }

    pub fn has_signature(&self) -> bool {
        self.record.signature_url.is_some()
    }
}

/// Timing and provenance for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionStats {
    /// Label of the extraction endpoint that answered.
    pub endpoint: String,
    /// Extraction requests sent, including the successful one.
    pub extraction_attempts: usize,
    /// Canonical fields that received a value.
    pub populated_fields: usize,
    pub extraction_duration_ms: u64,
    pub crop_duration_ms: u64,
    pub upload_duration_ms: u64,
    pub persist_duration_ms: u64,
    pub total_duration_ms: u64,
}

//! Error types for the idscan-ingest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the run cannot produce a record (provider
//!   not configured, every extraction endpoint failed, the document scan could
//!   not be stored, the insert failed). Returned as `Err(IngestError)` from the
//!   top-level `ingest*` functions. No record is ever written on this path.
//!
//! * [`StageError`] — **Non-fatal**: a face or signature crop could not be
//!   produced, or a best-effort upload failed. Collected into
//!   [`crate::output::IngestionOutput::warnings`]; the only consequence is an
//!   absent locator on the persisted record.
//!
//! The component-level errors ([`GeometryError`], [`CropError`],
//! [`StorageError`], [`StoreError`]) are mapped into one of the two by the
//! orchestrator, depending on which asset they concern.

use crate::pipeline::geometry::RegionKind;
use crate::record::AssetKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the idscan-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Capture file was not found at the given path.
    #[error("Capture file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a file path, HTTP(S) URL or data URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are neither JPEG nor PNG.
    #[error("'{source_name}' is not a JPEG or PNG image\nFirst bytes: {magic:?}")]
    NotAnImage { source_name: String, magic: Vec<u8> },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Provider credentials or model identifier are missing. No request was sent.
    #[error("Extraction provider is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    /// Every endpoint failed or returned no usable prediction.
    #[error("All {attempts} extraction endpoints failed.\nLast error: {last_error}")]
    ExtractionExhausted { attempts: usize, last_error: String },

    // ── Upload errors ─────────────────────────────────────────────────────
    /// A required asset could not be stored. Only raised for the document scan.
    #[error("Upload of {kind} failed: {detail}")]
    AssetUploadFailed { kind: AssetKind, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The record store did not complete the write.
    #[error("Persistence failed: {detail}")]
    PersistenceFailed { detail: String },

    /// A status update targeted a record that does not exist.
    #[error("Identity record {id} not found")]
    RecordNotFound { id: i64 },

    // ── Control ───────────────────────────────────────────────────────────
    /// The caller cancelled the run; nothing was persisted.
    #[error("Ingestion cancelled during {state}")]
    Cancelled { state: crate::ingest::PipelineState },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether restarting from `Extracting` with the same capture bytes may succeed.
    ///
    /// Configuration, input and cancellation errors need the caller to change
    /// something first (or capture again); transient service failures do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::ExtractionExhausted { .. }
                | IngestError::AssetUploadFailed { .. }
                | IngestError::PersistenceFailed { .. }
                | IngestError::DownloadFailed { .. }
                | IngestError::DownloadTimeout { .. }
        )
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => IngestError::RecordNotFound { id },
            other => IngestError::PersistenceFailed {
                detail: other.to_string(),
            },
        }
    }
}

/// A non-fatal error for a single optional asset.
///
/// Stored in [`crate::output::IngestionOutput::warnings`]. The run continues
/// and the corresponding locator is left absent.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// The crop for a region could not be produced.
    #[error("{region} crop failed: {detail}")]
    CropFailed { region: RegionKind, detail: String },

    /// A best-effort upload failed and was skipped.
    #[error("Upload of {kind} skipped: {detail}")]
    AssetUploadFailed { kind: AssetKind, detail: String },

    /// The selfie capture could not be decoded, so it was never uploaded.
    #[error("selfie could not be prepared: {detail}")]
    SelfieInvalid { detail: String },
}

/// Polygon could not be turned into a bounding box.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Raster cropping failures. All are non-fatal to a run.
#[derive(Debug, Error)]
pub enum CropError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("no {0} region in the prediction")]
    RegionMissing(RegionKind),

    #[error("source image could not be decoded: {0}")]
    Decode(String),

    #[error("crop region is empty ({width}x{height})")]
    EmptyRegion { width: u32, height: u32 },

    #[error("crop could not be encoded: {0}")]
    Encode(String),
}

/// Object-storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Transport(String),

    #[error("storage returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("object '{0}' already exists")]
    AlreadyExists(String),

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload timed out after {0}s")]
    Timeout(u64),
}

/// Record-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

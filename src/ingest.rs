//! Ingestion entry points and the pipeline state machine.
//!
//! A run walks a fixed sequence of states:
//!
//! ```text
//! Idle → Extracting → Normalizing → Cropping → Uploading → Persisting → Completed
//! ```
//!
//! Stages are awaited one after another because each consumes what the
//! previous one produced. `Failed` is reached from `Extracting` (every
//! endpoint failed, or the provider is not configured), from `Uploading`
//! (document scan only) and from `Persisting`. Crop failures and best-effort
//! upload failures never change the path; they only leave a locator absent.
//!
//! ## Cancellation
//!
//! Every stage before `Persisting` is raced against the context's
//! [`CancellationToken`], and the flag is checked once more before the
//! insert is issued. A cancelled run ends in `Cancelled` and writes nothing.
//! An insert that has already been issued is allowed to finish.

use crate::cancel::CancellationToken;
use crate::config::IngestConfig;
use crate::error::{IngestError, StageError};
use crate::output::{IngestionOutput, IngestionStats};
use crate::pipeline::crop::{self, CropJob};
use crate::pipeline::encode::{self, CaptureFormat};
use crate::pipeline::extract::ExtractionClient;
use crate::pipeline::geometry::{self, RegionKind};
use crate::pipeline::upload::{AssetBundle, AssetUploader};
use crate::pipeline::{input, normalize};
use crate::record::{AssetKind, DerivedAsset, IdentityRecord, NewIdentityRecord, VerificationStatus};
use crate::store::RecordStore;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── State machine ────────────────────────────────────────────────────────

/// Control state of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Extracting,
    Normalizing,
    Cropping,
    Uploading,
    Persisting,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Extracting => "extracting",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Cropping => "cropping",
            PipelineState::Uploading => "uploading",
            PipelineState::Persisting => "persisting",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inputs ───────────────────────────────────────────────────────────────

/// The captured frames for one run.
#[derive(Debug, Clone)]
pub struct DocumentCapture {
    /// Encoded document photograph (JPEG or PNG).
    pub document: Vec<u8>,
    /// Companion selfie, stored best-effort when present.
    pub selfie: Option<Vec<u8>>,
}

impl DocumentCapture {
    pub fn new(document: Vec<u8>) -> Self {
        Self {
            document,
            selfie: None,
        }
    }

    pub fn with_selfie(mut self, selfie: Vec<u8>) -> Self {
        self.selfie = Some(selfie);
        self
    }
}

/// Per-run context threaded in by the caller: who is ingesting, and how to stop.
#[derive(Debug, Clone, Default)]
pub struct IngestContext {
    /// Recorded on the identity record as `submitted_by`.
    pub submitted_by: Option<String>,
    pub cancel: CancellationToken,
}

impl IngestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted_by(mut self, who: impl Into<String>) -> Self {
        self.submitted_by = Some(who.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Tracks the current state and reports every transition.
struct Run<'a> {
    config: &'a IngestConfig,
    state: PipelineState,
    warnings: Vec<StageError>,
}

impl<'a> Run<'a> {
    fn new(config: &'a IngestConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, next: PipelineState) {
        debug!("Pipeline {} → {}", self.state, next);
        self.state = next;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_state_change(next);
        }
    }

    fn warn(&mut self, warning: StageError) {
        warn!("{}", warning);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_warning(&warning);
        }
        self.warnings.push(warning);
    }

    fn fail(&mut self, error: &IngestError) {
        let terminal = match error {
            IngestError::Cancelled { .. } => PipelineState::Cancelled,
            _ => PipelineState::Failed,
        };
        warn!("Ingestion {} during {}: {}", terminal, self.state, error);
        self.enter(terminal);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_failed(&error.to_string());
        }
    }
}

/// Race `fut` against cancellation of `token`.
async fn cancellable<T>(
    token: &CancellationToken,
    state: PipelineState,
    fut: impl Future<Output = Result<T, IngestError>>,
) -> Result<T, IngestError> {
    if token.is_cancelled() {
        return Err(IngestError::Cancelled { state });
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(IngestError::Cancelled { state }),
        result = fut => result,
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Ingest one captured document.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(IngestionOutput)` once a record has been inserted, even if a crop or
/// a best-effort upload failed (check `output.warnings`).
///
/// # Errors
/// Returns `Err(IngestError)` only for fatal errors; no record exists then:
/// - provider not configured, or no storage / record store in the config
/// - every extraction endpoint failed
/// - the document scan upload failed
/// - the insert failed
/// - the run was cancelled
pub async fn ingest(
    capture: &DocumentCapture,
    ctx: &IngestContext,
    config: &IngestConfig,
) -> Result<IngestionOutput, IngestError> {
    let mut run = Run::new(config);
    match run_pipeline(&mut run, capture, ctx).await {
        Ok(output) => Ok(output),
        Err(e) => {
            run.fail(&e);
            Err(e)
        }
    }
}

async fn run_pipeline(
    run: &mut Run<'_>,
    capture: &DocumentCapture,
    ctx: &IngestContext,
) -> Result<IngestionOutput, IngestError> {
    let config = run.config;
    let total_start = Instant::now();
    let storage = config
        .storage
        .clone()
        .ok_or_else(|| IngestError::InvalidConfig("no object storage configured".into()))?;
    let store = required_store(config)?;
    info!(
        "Starting ingestion: {} byte document, selfie {}",
        capture.document.len(),
        if capture.selfie.is_some() { "yes" } else { "no" }
    );

    // ── Step 1: Extract ──────────────────────────────────────────────────
    run.enter(PipelineState::Extracting);
    let client = ExtractionClient::from_config(config)?;
    let extract_start = Instant::now();
    let extraction = cancellable(
        &ctx.cancel,
        PipelineState::Extracting,
        client.extract_prediction(&capture.document),
    )
    .await?;
    let extraction_duration_ms = extract_start.elapsed().as_millis() as u64;

    // ── Step 2: Normalise ────────────────────────────────────────────────
    run.enter(PipelineState::Normalizing);
    let fields = normalize::normalize(&extraction.prediction);
    let populated_fields = fields.populated();
    info!("Normalised {} of 10 identity fields", populated_fields);

    // ── Step 3: Crop ─────────────────────────────────────────────────────
    run.enter(PipelineState::Cropping);
    let crop_start = Instant::now();
    let jobs = vec![
        CropJob {
            kind: RegionKind::Face,
            region: geometry::find_region(&extraction.prediction, RegionKind::Face),
            padding: config.face_padding,
        },
        CropJob {
            kind: RegionKind::Signature,
            region: geometry::find_region(&extraction.prediction, RegionKind::Signature),
            padding: config.signature_padding,
        },
    ];
    let quality = config.jpeg_quality;
    let outcome = cancellable(
        &ctx.cancel,
        PipelineState::Cropping,
        crop::crop_regions(&capture.document, jobs, quality),
    )
    .await?;

    let mut face = None;
    let mut signature = None;
    for (region, result) in outcome.results {
        match result {
            Ok(bytes) => {
                let asset = DerivedAsset::jpeg(asset_kind(region), bytes);
                match region {
                    RegionKind::Face => face = Some(asset),
                    RegionKind::Signature => signature = Some(asset),
                }
            }
            Err(e) => run.warn(StageError::CropFailed {
                region,
                detail: e.to_string(),
            }),
        }
    }

    let (document, selfie) = cancellable(
        &ctx.cancel,
        PipelineState::Cropping,
        prepare_scans(
            capture.document.clone(),
            outcome.decoded,
            capture.selfie.clone(),
            quality,
        ),
    )
    .await?;
    let selfie = match selfie {
        Some(Ok(bytes)) => Some(DerivedAsset::jpeg(AssetKind::Selfie, bytes)),
        Some(Err(detail)) => {
            run.warn(StageError::SelfieInvalid { detail });
            None
        }
        None => None,
    };
    let crop_duration_ms = crop_start.elapsed().as_millis() as u64;

    // ── Step 4: Upload ───────────────────────────────────────────────────
    run.enter(PipelineState::Uploading);
    let upload_start = Instant::now();
    let uploader = AssetUploader::new(storage, config.storage_prefix.clone(), config.upload_timeout_secs);
    let bundle = AssetBundle {
        document: DerivedAsset::jpeg(AssetKind::DocumentScan, document),
        face,
        signature,
        selfie,
    };
    let (locators, upload_warnings) = cancellable(
        &ctx.cancel,
        PipelineState::Uploading,
        uploader.upload_assets(bundle),
    )
    .await?;
    for warning in upload_warnings {
        run.warn(warning);
    }
    let upload_duration_ms = upload_start.elapsed().as_millis() as u64;

    // ── Step 5: Persist ──────────────────────────────────────────────────
    if ctx.cancel.is_cancelled() {
        return Err(IngestError::Cancelled {
            state: PipelineState::Uploading,
        });
    }
    run.enter(PipelineState::Persisting);
    let persist_start = Instant::now();
    let new_record = NewIdentityRecord::new(fields, &locators, ctx.submitted_by.clone());
    let record = store
        .insert(new_record)
        .await
        .map_err(|e| IngestError::PersistenceFailed {
            detail: e.to_string(),
        })?;
    let persist_duration_ms = persist_start.elapsed().as_millis() as u64;

    // ── Step 6: Complete ─────────────────────────────────────────────────
    let stats = IngestionStats {
        endpoint: extraction.endpoint.clone(),
        extraction_attempts: extraction.attempts,
        populated_fields,
        extraction_duration_ms,
        crop_duration_ms,
        upload_duration_ms,
        persist_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Ingestion complete: record {} ({} warnings, {}ms total)",
        record.id,
        run.warnings.len(),
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_complete(record.id);
    }
    run.enter(PipelineState::Completed);

    Ok(IngestionOutput {
        record,
        warnings: std::mem::take(&mut run.warnings),
        stats,
        prediction: extraction.prediction,
    })
}

/// Ingest captures given as paths, HTTP(S) URLs or `data:` URLs.
///
/// Input errors (missing file, failed download, not an image) are returned
/// before the pipeline leaves `Idle`.
pub async fn ingest_from_input(
    document: &str,
    selfie: Option<&str>,
    ctx: &IngestContext,
    config: &IngestConfig,
) -> Result<IngestionOutput, IngestError> {
    let document = input::resolve_input(document, config.download_timeout_secs).await?;
    let selfie = match selfie {
        Some(s) => Some(input::resolve_input(s, config.download_timeout_secs).await?),
        None => None,
    };
    ingest(&DocumentCapture { document, selfie }, ctx, config).await
}

/// Synchronous wrapper around [`ingest_from_input`].
///
/// Creates a temporary tokio runtime internally.
pub fn ingest_sync(
    document: &str,
    selfie: Option<&str>,
    ctx: &IngestContext,
    config: &IngestConfig,
) -> Result<IngestionOutput, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest_from_input(document, selfie, ctx, config))
}

// ── Record access ────────────────────────────────────────────────────────

/// Move a record to `verified` or `rejected` (or back to `pending`).
///
/// This is the reviewer's action; it sits outside the ingestion state
/// machine and touches stored data only.
pub async fn set_verification_status(
    config: &IngestConfig,
    id: i64,
    status: VerificationStatus,
) -> Result<IdentityRecord, IngestError> {
    let store = required_store(config)?;
    store.update_status(id, status).await?;
    info!("Record {} set to {}", id, status);
    store
        .get_by_id(id)
        .await?
        .ok_or(IngestError::RecordNotFound { id })
}

/// The most recently inserted record, or `None` when nothing was ingested yet.
pub async fn latest_record(config: &IngestConfig) -> Result<Option<IdentityRecord>, IngestError> {
    Ok(required_store(config)?.get_latest().await?)
}

pub async fn get_record(config: &IngestConfig, id: i64) -> Result<Option<IdentityRecord>, IngestError> {
    Ok(required_store(config)?.get_by_id(id).await?)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn required_store(config: &IngestConfig) -> Result<Arc<dyn RecordStore>, IngestError> {
    config
        .store
        .clone()
        .ok_or_else(|| IngestError::InvalidConfig("no record store configured".into()))
}

fn asset_kind(region: RegionKind) -> AssetKind {
    match region {
        RegionKind::Face => AssetKind::FaceCrop,
        RegionKind::Signature => AssetKind::SignatureCrop,
    }
}

/// Produce the stored JPEG bytes of the document scan and the selfie.
///
/// The selfie result is `Err` with a reason when it is not a usable image.
async fn prepare_scans(
    document: Vec<u8>,
    decoded: Option<image::DynamicImage>,
    selfie: Option<Vec<u8>>,
    quality: u8,
) -> Result<(Vec<u8>, Option<Result<Vec<u8>, String>>), IngestError> {
    tokio::task::spawn_blocking(move || {
        let document = encode::document_scan_bytes(&document, decoded.as_ref(), quality);
        if encode::sniff_format(&document) != Some(CaptureFormat::Jpeg) {
            warn!("Document scan could not be re-encoded; storing it as captured");
        }

        let selfie = selfie.map(|bytes| {
            let decoded = match encode::sniff_format(&bytes) {
                Some(CaptureFormat::Jpeg) => None,
                _ => crop::decode(&bytes).ok(),
            };
            let out = encode::document_scan_bytes(&bytes, decoded.as_ref(), quality);
            match encode::sniff_format(&out) {
                Some(CaptureFormat::Jpeg) => Ok(out),
                _ => Err("selfie is not a decodable image".to_string()),
            }
        });
        (document, selfie)
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Encode task panicked: {}", e)))
}

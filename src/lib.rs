//! # idscan-ingest
//!
//! Turn a photographed identity document into a persisted, reviewable
//! identity record.
//!
//! ## Why this crate?
//!
//! Extraction providers disagree on almost everything: route shapes, where
//! the prediction sits in the response, what the fields are called. This
//! crate hides that behind an ordered endpoint list, a fixed set of envelope
//! probes and an alias table, then does the rest of the onboarding chore:
//! crops the holder's portrait and signature, stores every image, and writes
//! one `pending` record a reviewer can later verify or reject.
//!
//! ## Pipeline Overview
//!
//! ```text
//! capture (document + optional selfie)
//!  │
//!  ├─ 1. Extract    POST to each endpoint in order until one yields a prediction
//!  ├─ 2. Normalize  provider aliases → canonical identity fields
//!  ├─ 3. Crop       face / signature polygons → padded JPEG crops (spawn_blocking)
//!  ├─ 4. Upload     scan (required) + crops + selfie (best-effort), concurrently
//!  └─ 5. Persist    one append-only insert, status = pending
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idscan_ingest::{
//!     ingest_from_input, IngestConfig, IngestContext, LocalObjectStorage, SqliteRecordStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials from IDSCAN_API_KEY / IDSCAN_MODEL_ID
//!     let config = IngestConfig::from_env()
//!         .storage(Arc::new(LocalObjectStorage::new("./assets", "http://localhost:8080")))
//!         .store(Arc::new(SqliteRecordStore::open("records.db").await?))
//!         .build()?;
//!     let ctx = IngestContext::new().submitted_by("guest-17");
//!     let output = ingest_from_input("passport.jpg", None, &ctx, &config).await?;
//!     println!("record {} ({} warnings)", output.record.id, output.warnings.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `idscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! idscan-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancellationToken;
pub use config::{EndpointKind, ExtractionEndpoint, IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, StageError};
pub use ingest::{
    get_record, ingest, ingest_from_input, ingest_sync, latest_record, set_verification_status,
    DocumentCapture, IngestContext, PipelineState,
};
pub use output::{IngestionOutput, IngestionStats};
pub use pipeline::extract::{ExtractionTransport, HttpTransport, ProviderPrediction};
pub use pipeline::upload::{LocalObjectStorage, ObjectStorage, RestObjectStorage};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{
    AssetKind, AssetLocators, CanonicalIdentityFields, IdentityRecord, VerificationStatus,
};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};

//! Pipeline stages for identity-document ingestion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the orchestrator in [`crate::ingest`] stays a
//! thin sequence of calls.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ normalize ──▶ geometry ──▶ crop ──▶ upload
//! (bytes)   (provider)  (aliases)     (polygons)   (raster)  (storage)
//! ```
//!
//! 1. [`input`]     — resolve a path, URL or data URL to validated image bytes
//! 2. [`extract`]   — walk the endpoint list until one yields a prediction;
//!    the only stage that talks to the extraction provider
//! 3. [`normalize`] — map provider field aliases onto canonical attributes
//! 4. [`geometry`]  — find the face and signature polygons, compute boxes
//! 5. [`crop`]      — cut and JPEG-encode the regions; runs in
//!    `spawn_blocking` because decoding and encoding are CPU-bound
//! 6. [`encode`]    — JPEG encoding and capture-format sniffing
//! 7. [`upload`]    — store the scan and crops concurrently, return locators

pub mod crop;
pub mod encode;
pub mod extract;
pub mod geometry;
pub mod input;
pub mod normalize;
pub mod upload;

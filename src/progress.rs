//! Progress-callback trait for ingestion pipeline events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to observe a run
//! as it moves through its states.
//!
//! # Why callbacks instead of channels?
//!
//! A capture screen, a CLI spinner and an audit log all want the same events
//! but consume them differently. A `Send + Sync` callback lets each host
//! forward them wherever it likes without the library knowing how the host
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use idscan_ingest::{IngestConfig, IngestProgressCallback, PipelineState};
//! use std::sync::{Arc, Mutex};
//!
//! struct Recorder(Mutex<Vec<PipelineState>>);
//!
//! impl IngestProgressCallback for Recorder {
//!     fn on_state_change(&self, state: PipelineState) {
//!         self.0.lock().unwrap().push(state);
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .api_key("key")
//!     .model_id("model")
//!     .progress_callback(Arc::new(Recorder(Mutex::new(Vec::new()))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::StageError;
use crate::ingest::PipelineState;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for one run are delivered sequentially.
pub trait IngestProgressCallback: Send + Sync {
    /// Called on every state transition, including the terminal one.
    fn on_state_change(&self, state: PipelineState) {
        let _ = state;
    }

    /// Called for each non-fatal crop or upload failure.
    fn on_warning(&self, warning: &StageError) {
        let _ = warning;
    }

    /// Called once the record has been inserted.
    fn on_complete(&self, record_id: i64) {
        let _ = record_id;
    }

    /// Called when the run ends in `Failed` or `Cancelled`.
    ///
    /// # Arguments
    /// * `error` — human-readable description of the fatal error
    fn on_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

//! Observer trait for ingest lifecycle events.
//!
//! Inject an [`Arc<dyn IngestObserver>`] via
//! [`crate::pipeline::IngestionPipeline::with_observer`] to follow each
//! request through the state machine, or to be told when a cleanup step
//! could not be completed.
//!
//! # Example
//!
//! ```rust
//! use docstore::{IngestObserver, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Completed(AtomicUsize);
//!
//! impl IngestObserver for Completed {
//!     fn on_stage(&self, _key: Option<&str>, stage: Stage) {
//!         if stage == Stage::Complete {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::error::DocstoreError;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the ingestion pipeline as a request moves between stages.
///
/// Requests run concurrently, so methods may be called from several tasks
/// at once. All methods default to no-ops.
///
/// `key` is the storage key assigned to the request; it is `None` until
/// validation has passed.
pub trait IngestObserver: Send + Sync {
    /// A stage was reached.
    fn on_stage(&self, key: Option<&str>, stage: Stage) {
        let _ = (key, stage);
    }

    /// The request failed while attempting `stage`.
    fn on_failure(&self, key: Option<&str>, stage: Stage, error: &DocstoreError) {
        let _ = (key, stage, error);
    }

    /// A compensating action failed. `what` names the resource
    /// (`"staging"` or `"object"`).
    fn on_cleanup_failed(&self, key: &str, what: &str, detail: &str) {
        let _ = (key, what, detail);
    }
}

/// Default observer that ignores every event.
pub struct NoopObserver;

impl IngestObserver for NoopObserver {}

pub type SharedObserver = Arc<dyn IngestObserver>;

//! Pipeline stages for document ingestion.
//!
//! Each submodule implements one step of the ingest state machine; the
//! orchestrator in [`ingest`] drives them and owns the cleanup matrix.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ stage ──▶ sanitize ──▶ put ──▶ create row
//! (upload)     (tmpdir)  (lopdf)     (backend) (metadata)
//! ```
//!
//! 1. [`validate`]: reject bad uploads before any resource is touched
//! 2. [`staging`]: write raw bytes into a per-request temp directory
//! 3. [`sanitize`]: strip active content from PDFs; runs in
//!    `spawn_blocking` because lopdf parsing is CPU-bound
//! 4. [`ingest`]: commit to the backend, record the row, undo on failure

pub mod ingest;
pub mod sanitize;
pub mod staging;
pub mod validate;

use serde::Serialize;
use std::fmt;

/// Position in the ingest state machine.
///
/// A failure is reported together with the stage that was being attempted,
/// so `Failed(stage)` is represented as `IngestError { stage, .. }` rather
/// than as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    Staged,
    Sanitized,
    Stored,
    Persisted,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Staged => "staged",
            Stage::Sanitized => "sanitized",
            Stage::Stored => "stored",
            Stage::Persisted => "persisted",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub use ingest::IngestionPipeline;
pub use sanitize::{is_sanitizable, SanitizeReport};
pub use validate::{Upload, UploadBody, Validator};

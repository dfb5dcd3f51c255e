//! Error types for the docstore library.
//!
//! Each component owns a narrow error enum so callers can match on exactly
//! the failures a stage can produce:
//!
//! * [`ValidationError`]: the upload was rejected before any resource was
//!   touched. Always client-caused.
//! * [`StorageError`]: the byte store failed (connectivity, permissions,
//!   missing object, timeout).
//! * [`SanitizeError`]: the upload could not be parsed as a document of the
//!   expected format.
//! * [`ExtractionError`]: a stored document could not be read page-wise.
//! * [`ConflictError`] / [`NotFoundError`]: metadata store outcomes.
//!
//! [`DocstoreError`] aggregates all of them and knows how to render itself
//! as a transport-agnostic [`ErrorBody`] with a status code.
//! [`IngestError`] wraps a `DocstoreError` with the pipeline stage that
//! failed.

use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ── Validation ────────────────────────────────────────────────────────────

/// Rejections produced by the upload validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request carried no file payload at all.
    #[error("No file part")]
    MissingFile,

    /// A payload was present but its filename is empty.
    #[error("No selected file")]
    EmptyFilename,

    /// The extension is missing or not in the allow-list.
    #[error("File not allowed")]
    DisallowedExtension { extension: Option<String> },

    /// The payload is larger than the configured maximum.
    #[error("File exceeds size limit of {}", human_size(*limit))]
    SizeExceeded { limit: u64 },
}

// ── Metadata store ────────────────────────────────────────────────────────

/// A uniqueness constraint was violated in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("A document with storage key '{storage_key}' already exists")]
    DuplicateKey { storage_key: String },

    /// Another row already points at this stored object.
    #[error("Stored object '{locator}' already belongs to another document")]
    DuplicateLocator { locator: String },
}

/// A lookup by id found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("Document {id} not found")]
    Document { id: i64 },
}

// ── Storage backends ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached, or the call timed out.
    #[error("Storage backend '{backend}' is unreachable: {detail}")]
    Unreachable { backend: String, detail: String },

    /// The backend refused the operation.
    #[error("Permission denied by storage backend '{backend}': {detail}")]
    PermissionDenied { backend: String, detail: String },

    /// Writing the object failed after the backend was reached.
    #[error("Failed to write '{key}' to storage backend '{backend}': {detail}")]
    WriteFailed {
        backend: String,
        key: String,
        detail: String,
    },

    /// The locator does not resolve through this backend.
    #[error("Stored object not found: {locator}")]
    NotFound { locator: String },
}

// ── Sanitizer ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("Document cannot be sanitized: {detail}")]
    MalformedInput { detail: String },
}

// ── Content reader ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: i64, total: usize },

    #[error("Document is malformed: {detail}")]
    MalformedDocument { detail: String },

    #[error("Failed to extract text from page {page}: {detail}")]
    ExtractionFailed { page: i64, detail: String },
}

// ── Aggregate ─────────────────────────────────────────────────────────────

/// All errors returned by the docstore library.
#[derive(Debug, Error)]
pub enum DocstoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A local staging artifact could not be written.
    #[error("Failed to stage upload at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata store failed for a reason other than conflict/not-found.
    #[error("Metadata store error: {0}")]
    Metadata(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocstoreError {
    /// Status code a transport layer should use for this error.
    ///
    /// Client-caused failures map to 4xx, everything the server is
    /// responsible for maps to 500.
    pub fn status_code(&self) -> u16 {
        match self {
            DocstoreError::Validation(_) | DocstoreError::Sanitize(_) => 422,
            DocstoreError::NotFound(_) => 404,
            DocstoreError::Conflict(_) => 409,
            DocstoreError::Extraction(ExtractionError::PageOutOfRange { .. }) => 400,
            DocstoreError::InvalidConfig(_) => 400,
            _ => 500,
        }
    }

    /// Whether the message can be shown to the caller as-is.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }

    /// Render as a structured error body.
    ///
    /// Client errors carry their message verbatim in `result`; server errors
    /// carry a generic message and the internal detail in `error`.
    pub fn to_body(&self) -> ErrorBody {
        if self.is_client_error() {
            return ErrorBody {
                status: "error".to_string(),
                result: self.to_string(),
                error: None,
            };
        }

        let result = match self {
            DocstoreError::Storage(e) => match e {
                StorageError::NotFound { .. } => "Stored document content not found",
                StorageError::Unreachable { .. } => "Storage backend unavailable",
                StorageError::PermissionDenied { .. } => "Storage backend denied access",
                StorageError::WriteFailed { .. } => "Failed to store document",
            },
            DocstoreError::Staging { .. } => "Failed to store document",
            DocstoreError::Extraction(_) => "Failed to extract document content",
            DocstoreError::Metadata(_) => "Failed to record document",
            _ => "Internal server error",
        };

        ErrorBody {
            status: "error".to_string(),
            result: result.to_string(),
            error: Some(self.to_string()),
        }
    }
}

/// Failure of an ingestion request, tagged with the stage that failed.
#[derive(Debug, Error)]
#[error("Ingestion failed at stage {stage}: {source}")]
pub struct IngestError {
    pub stage: Stage,
    #[source]
    pub source: DocstoreError,
}

impl IngestError {
    pub fn new(stage: Stage, source: impl Into<DocstoreError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// Drop the stage and keep the original error.
    pub fn into_inner(self) -> DocstoreError {
        self.source
    }

    pub fn status_code(&self) -> u16 {
        self.source.status_code()
    }

    pub fn to_body(&self) -> ErrorBody {
        self.source.to_body()
    }
}

impl From<IngestError> for DocstoreError {
    fn from(e: IngestError) -> Self {
        e.source
    }
}

/// Wire shape of an error: `{status: "error", result, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// "4MB", "512KB", "1536B". Whole units only, falling back to a smaller one.
pub(crate) fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{}B", bytes)
    }
}

//! # docstore
//!
//! Accept uploaded documents, validate and sanitize them, commit them to a
//! local or S3-compatible store, record their metadata, and read them back
//! page by page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Upload
//!  │
//!  ├─ 1. Validate  filename, extension allow-list, size limit
//!  ├─ 2. Stage     raw bytes into a per-request temp directory
//!  ├─ 3. Sanitize  strip scripts, annotations and metadata (lopdf, spawn_blocking)
//!  ├─ 4. Store     atomic put into the configured backend
//!  ├─ 5. Persist   insert the metadata row (the unit of work)
//!  └─ 6. Complete  remove staging, return the Document
//! ```
//!
//! Any failure undoes what the earlier steps did: no row without an object,
//! no object without a row, nothing left in the staging root.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docstore::{
//!     DocstoreConfig, DocumentService, IngestionPipeline, LocalBackend,
//!     MemoryMetadataStore, Upload,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DocstoreConfig::builder().upload_root("uploads").build()?;
//!     let backend = Arc::new(LocalBackend::create(&config.upload_root).await?);
//!     let metadata = Arc::new(MemoryMetadataStore::new());
//!     let service = DocumentService::new(IngestionPipeline::new(config, backend, metadata)?);
//!
//!     let bytes = std::fs::read("report.pdf")?;
//!     let doc = service.ingest(Upload::from_bytes("report.pdf", bytes)).await?;
//!     let page = service.extract_page(doc.id, 1).await?;
//!     println!("{} has {} pages", page.document_name, page.number_of_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docstore` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docstore = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod metadata;
pub mod observer;
pub mod pipeline;
pub mod reader;
pub mod service;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BackendConfig, DocstoreConfig, DocstoreConfigBuilder, RemoteConfig};
pub use document::{secure_filename, Document, DocumentPatch, Locator, NewDocument, PageExtract};
pub use error::{
    ConflictError, DocstoreError, ErrorBody, ExtractionError, IngestError, NotFoundError,
    SanitizeError, StorageError, ValidationError,
};
pub use metadata::{MemoryMetadataStore, MetadataStore, SqliteMetadataStore};
pub use observer::{IngestObserver, NoopObserver};
pub use pipeline::{IngestionPipeline, Stage, Upload, UploadBody, Validator};
pub use reader::{ContentReader, PageContent};
pub use service::DocumentService;
pub use storage::{Deletion, LocalBackend, ObjectHandle, RemoteBackend, StorageBackend};

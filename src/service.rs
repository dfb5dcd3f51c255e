//! Transport-agnostic document operations.
//!
//! [`DocumentService`] is the surface a CLI or HTTP layer talks to. It owns
//! the ingestion pipeline and adds the read, update and delete paths on top
//! of the same backend and metadata store.

use crate::document::{secure_filename, Document, DocumentPatch, Locator, PageExtract};
use crate::error::{DocstoreError, IngestError, StorageError, ValidationError};
use crate::pipeline::{IngestionPipeline, Upload};
use crate::reader::ContentReader;
use crate::storage::{timed, Deletion};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DocumentService {
    pipeline: IngestionPipeline,
    reader: ContentReader,
}

impl DocumentService {
    pub fn new(pipeline: IngestionPipeline) -> Self {
        Self {
            pipeline,
            reader: ContentReader::new(),
        }
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub async fn ingest(&self, upload: Upload) -> Result<Document, IngestError> {
        self.pipeline.ingest(upload).await
    }

    pub async fn list(&self) -> Result<Vec<Document>, DocstoreError> {
        self.pipeline.metadata().list().await
    }

    pub async fn get(&self, id: i64) -> Result<Document, DocstoreError> {
        self.pipeline.metadata().get(id).await
    }

    /// Update the mutable fields of a row.
    ///
    /// A new display name goes through [`secure_filename`]. A new locator
    /// must resolve through the configured backend and must not belong to
    /// another row (`Conflict`); once the row points at it, the object it
    /// replaced is deleted.
    pub async fn patch(&self, id: i64, mut patch: DocumentPatch) -> Result<Document, DocstoreError> {
        if let Some(name) = patch.display_name.take() {
            let safe = secure_filename(&name);
            if safe.is_empty() {
                return Err(ValidationError::EmptyFilename.into());
            }
            patch.display_name = Some(safe);
        }

        if let Some(ref locator) = patch.locator {
            let backend = self.pipeline.backend();
            let present = timed(
                backend.name(),
                "exists",
                self.pipeline.config().io_timeout(),
                backend.exists(locator),
            )
            .await?;
            if !present {
                return Err(StorageError::NotFound {
                    locator: locator.to_string(),
                }
                .into());
            }
        }

        if patch.is_empty() {
            return self.get(id).await;
        }
        let previous = match patch.locator {
            Some(_) => Some(self.get(id).await?.locator),
            None => None,
        };
        let doc = self.pipeline.metadata().patch(id, patch).await?;
        info!(id, key = %doc.storage_key, "document updated");

        if let Some(old) = previous.filter(|old| old != &doc.locator) {
            match self.delete_object(&old).await {
                Ok(_) => info!(id, locator = %old, "replaced object removed"),
                Err(e) => warn!(id, locator = %old, error = %e, "failed to remove replaced object"),
            }
        }
        Ok(doc)
    }

    /// Hard delete: the row goes first, then the stored object.
    ///
    /// Once the row is gone the document is unreachable, so a failure to
    /// remove the object is logged rather than returned.
    pub async fn delete(&self, id: i64) -> Result<Document, DocstoreError> {
        let doc = self.get(id).await?;
        self.pipeline.metadata().delete(id).await?;

        match self.delete_object(&doc.locator).await {
            Ok(Deletion::Removed) => info!(id, locator = %doc.locator, "document deleted"),
            Ok(Deletion::Absent) => {
                warn!(id, locator = %doc.locator, "document deleted; stored object was already gone")
            }
            Err(e) => warn!(id, locator = %doc.locator, error = %e, "row deleted but object removal failed"),
        }
        Ok(doc)
    }

    async fn delete_object(&self, locator: &Locator) -> Result<Deletion, StorageError> {
        let backend = self.pipeline.backend();
        timed(
            backend.name(),
            "delete",
            self.pipeline.config().io_timeout(),
            backend.delete(locator),
        )
        .await
    }

    /// Text of 1-based `page` of document `id`.
    pub async fn extract_page(&self, id: i64, page: i64) -> Result<PageExtract, DocstoreError> {
        let doc = self.get(id).await?;
        let backend = self.pipeline.backend();
        let handle = timed(
            backend.name(),
            "open",
            self.pipeline.config().io_timeout(),
            backend.open(&doc.locator),
        )
        .await?;

        let content = self.reader.read_page(&handle, page).await?;
        info!(id, page, pages = content.page_count, "page extracted");
        Ok(PageExtract {
            document_name: doc.display_name,
            number_of_pages: content.page_count,
            text: content.text,
            page,
        })
    }
}

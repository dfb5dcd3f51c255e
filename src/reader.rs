//! Page-wise text extraction from stored documents.
//!
//! Works the same for both [`ObjectHandle`] variants: a local path is read
//! from disk, a buffered object is parsed in place. Parsing runs inside
//! `spawn_blocking`.

use crate::error::{DocstoreError, ExtractionError, StorageError};
use crate::storage::ObjectHandle;
use lopdf::Document;
use std::io::ErrorKind;
use tracing::debug;

/// PDF header magic. Parsers tolerate a little junk before it.
const PDF_MAGIC: &[u8] = b"%PDF-";
const MAGIC_WINDOW: usize = 1024;

/// Text of one page plus the document's page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub page_count: usize,
    pub text: String,
}

/// Reads pages from stored PDF documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentReader;

impl ContentReader {
    pub fn new() -> Self {
        Self
    }

    /// Extract the text of 1-based `page`.
    pub async fn read_page(
        &self,
        handle: &ObjectHandle,
        page: i64,
    ) -> Result<PageContent, DocstoreError> {
        let bytes = handle.read_all().await.map_err(|e| match (e.kind(), handle.path()) {
            (ErrorKind::NotFound, Some(path)) => DocstoreError::Storage(StorageError::NotFound {
                locator: path.display().to_string(),
            }),
            _ => ExtractionError::MalformedDocument {
                detail: format!("cannot read document: {e}"),
            }
            .into(),
        })?;

        tokio::task::spawn_blocking(move || extract_page(&bytes, page))
            .await
            .map_err(|e| DocstoreError::Internal(format!("Extraction task panicked: {}", e)))?
            .map_err(DocstoreError::from)
    }
}

/// Blocking implementation of [`ContentReader::read_page`].
pub fn extract_page(bytes: &[u8], page: i64) -> Result<PageContent, ExtractionError> {
    let head = &bytes[..bytes.len().min(MAGIC_WINDOW)];
    if !head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        return Err(ExtractionError::MalformedDocument {
            detail: "not a PDF document".to_string(),
        });
    }

    let doc = Document::load_mem(bytes).map_err(|e| ExtractionError::MalformedDocument {
        detail: e.to_string(),
    })?;
    let page_count = doc.get_pages().len();

    let number = match u32::try_from(page) {
        Ok(n) if n >= 1 && (n as usize) <= page_count => n,
        _ => {
            return Err(ExtractionError::PageOutOfRange {
                page,
                total: page_count,
            })
        }
    };

    let text = doc
        .extract_text(&[number])
        .map_err(|e| ExtractionError::ExtractionFailed {
            page,
            detail: e.to_string(),
        })?;
    debug!(page, page_count, chars = text.len(), "page extracted");

    Ok(PageContent { page_count, text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_is_malformed() {
        let err = extract_page(b"dummy data", 1).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::MalformedDocument {
                detail: "not a PDF document".into()
            }
        );
    }

    #[test]
    fn truncated_pdf_is_malformed() {
        let err = extract_page(b"%PDF-1.7\n1 0 obj\n<<", 1).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedDocument { .. }));
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let handle = ObjectHandle::Local(dir.path().join("gone.pdf"));
        let err = ContentReader::new().read_page(&handle, 1).await.unwrap_err();
        assert!(matches!(
            err,
            DocstoreError::Storage(StorageError::NotFound { .. })
        ));
    }
}

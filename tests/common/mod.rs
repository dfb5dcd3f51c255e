//! Shared fixtures for integration tests: PDF builders, temp workspaces and
//! failure-injecting store/backend implementations.

#![allow(dead_code)]

use async_trait::async_trait;
use docstore::storage::{Deletion, ObjectHandle};
use docstore::{
    DocstoreConfig, DocstoreConfigBuilder, DocstoreError, Document, DocumentPatch,
    DocumentService, IngestionPipeline, LocalBackend, Locator, MemoryMetadataStore,
    MetadataStore, NewDocument, StorageBackend, StorageError,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ── PDF fixtures ─────────────────────────────────────────────────────────────

/// A PDF with one page per entry, each showing that text in Courier.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let (mut doc, catalog_id) = build_pdf(pages);
    doc.trailer.set("Root", catalog_id);
    save(&mut doc)
}

/// A one-page PDF carrying an OpenAction script, a link annotation and an
/// Info dictionary.
pub fn pdf_with_active_content(text: &str) -> Vec<u8> {
    let (mut doc, catalog_id) = build_pdf(&[text]);

    let js_id = doc.add_object(dictionary! {
        "S" => "JavaScript",
        "JS" => Object::string_literal("app.alert('hi')"),
    });
    let annot_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![0.into(), 0.into(), 50.into(), 50.into()],
    });
    let info_id = doc.add_object(dictionary! {
        "Author" => Object::string_literal("someone"),
    });

    if let Ok(catalog) = doc.get_object_mut(catalog_id).and_then(Object::as_dict_mut) {
        catalog.set("OpenAction", js_id);
    }
    let first_page = doc.get_pages().values().next().copied();
    if let Some(page_id) = first_page {
        if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            page.set("Annots", vec![Object::from(annot_id)]);
        }
    }
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    save(&mut doc)
}

fn build_pdf(pages: &[&str]) -> (PdfDocument, lopdf::ObjectId) {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let stream = Stream::new(dictionary! {}, content.encode().unwrap());
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    (doc, catalog_id)
}

fn save(doc: &mut PdfDocument) -> Vec<u8> {
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

// ── Workspace ────────────────────────────────────────────────────────────────

/// Temp directory holding an upload root and a separate staging root.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn upload_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    /// Builder preset to this workspace, allowing `pdf` and `txt`.
    pub fn config(&self) -> DocstoreConfigBuilder {
        DocstoreConfig::builder()
            .upload_root(self.upload_root())
            .staging_root(self.staging_root())
            .allowed_extensions(["pdf", "txt"])
    }

    pub async fn local_backend(&self) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::create(self.upload_root()).await.unwrap())
    }

    /// Local backend plus in-memory metadata, default limits.
    pub async fn service(&self) -> (DocumentService, Arc<MemoryMetadataStore>) {
        self.service_with(self.config().build().unwrap()).await
    }

    pub async fn service_with(
        &self,
        config: DocstoreConfig,
    ) -> (DocumentService, Arc<MemoryMetadataStore>) {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let pipeline =
            IngestionPipeline::new(config, self.local_backend().await, metadata.clone()).unwrap();
        (DocumentService::new(pipeline), metadata)
    }

    /// Committed objects in the upload root.
    pub fn stored_objects(&self) -> Vec<String> {
        list_dir(&self.upload_root())
    }

    /// Leftover entries in the staging root.
    pub fn staging_entries(&self) -> Vec<String> {
        list_dir(&self.staging_root())
    }
}

/// Every path under `root`, relative and sorted.
pub fn tree(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
            if path.is_dir() {
                walk(root, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

pub fn list_dir(path: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Failure injection ────────────────────────────────────────────────────────

/// Metadata store whose `create` always fails; reads are delegated.
#[derive(Default)]
pub struct RejectingMetadataStore {
    inner: MemoryMetadataStore,
}

#[async_trait]
impl MetadataStore for RejectingMetadataStore {
    async fn create(&self, _doc: NewDocument) -> Result<Document, DocstoreError> {
        Err(DocstoreError::Metadata("database is locked".into()))
    }

    async fn get(&self, id: i64) -> Result<Document, DocstoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Document>, DocstoreError> {
        self.inner.list().await
    }

    async fn patch(&self, id: i64, patch: DocumentPatch) -> Result<Document, DocstoreError> {
        self.inner.patch(id, patch).await
    }

    async fn delete(&self, id: i64) -> Result<(), DocstoreError> {
        self.inner.delete(id).await
    }
}

/// Wraps a backend and optionally fails `put` or `delete`.
pub struct FaultyBackend {
    pub inner: Arc<dyn StorageBackend>,
    pub fail_put: bool,
    pub fail_delete: bool,
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    async fn put(&self, key: &str, source: &Path) -> Result<Locator, StorageError> {
        if self.fail_put {
            return Err(StorageError::Unreachable {
                backend: "faulty".into(),
                detail: "connection refused".into(),
            });
        }
        self.inner.put(key, source).await
    }

    async fn open(&self, locator: &Locator) -> Result<ObjectHandle, StorageError> {
        self.inner.open(locator).await
    }

    async fn delete(&self, locator: &Locator) -> Result<Deletion, StorageError> {
        if self.fail_delete {
            return Err(StorageError::PermissionDenied {
                backend: "faulty".into(),
                detail: "delete not permitted".into(),
            });
        }
        self.inner.delete(locator).await
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError> {
        self.inner.exists(locator).await
    }

    fn locator_for(&self, key: &str) -> Result<Locator, StorageError> {
        self.inner.locator_for(key)
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}

/// Commits every `put` and then never answers, like a store whose response
/// is lost after the write landed.
pub struct SilentBackend {
    pub inner: Arc<dyn StorageBackend>,
}

#[async_trait]
impl StorageBackend for SilentBackend {
    async fn put(&self, key: &str, source: &Path) -> Result<Locator, StorageError> {
        self.inner.put(key, source).await?;
        std::future::pending().await
    }

    async fn open(&self, locator: &Locator) -> Result<ObjectHandle, StorageError> {
        self.inner.open(locator).await
    }

    async fn delete(&self, locator: &Locator) -> Result<Deletion, StorageError> {
        self.inner.delete(locator).await
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError> {
        self.inner.exists(locator).await
    }

    fn locator_for(&self, key: &str) -> Result<Locator, StorageError> {
        self.inner.locator_for(key)
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

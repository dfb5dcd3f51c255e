//! Ingest orchestration and the cleanup matrix.
//!
//! ```text
//! Received ─▶ Validated ─▶ Staged ─▶ Sanitized ─▶ Stored ─▶ Persisted ─▶ Complete
//! ```
//!
//! | failing step | undo                                   |
//! |--------------|----------------------------------------|
//! | validate     | nothing                                |
//! | stage        | staging directory                      |
//! | sanitize     | staging directory                      |
//! | put          | staging directory                      |
//! | put timeout  | backend object, then staging directory |
//! | create row   | backend object, then staging directory |
//!
//! A `put` that times out may still have committed, so its key is deleted
//! as well. After any failure the backend, the staging root and the metadata
//! store look as they did before the request. The staging root itself is
//! created once, in [`IngestionPipeline::new`]. Cleanup failures are logged and
//! reported to the observer; the caller always sees the original error.

use super::sanitize::{is_sanitizable, sanitize_file};
use super::staging::StagingArea;
use super::validate::{Upload, Validator};
use super::Stage;
use crate::config::DocstoreConfig;
use crate::document::{generate_storage_key, Document, Locator, NewDocument};
use crate::error::{DocstoreError, IngestError, ValidationError};
use crate::metadata::MetadataStore;
use crate::observer::{IngestObserver, NoopObserver, SharedObserver};
use crate::storage::{timed, timeout_error, Deletion, StorageBackend};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces the storage key for a sanitised display name.
pub type KeyGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Drives uploads from validation to a committed [`Document`].
///
/// Cheap to clone; all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct IngestionPipeline {
    config: Arc<DocstoreConfig>,
    validator: Arc<Validator>,
    backend: Arc<dyn StorageBackend>,
    metadata: Arc<dyn MetadataStore>,
    observer: SharedObserver,
    key_generator: KeyGenerator,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    /// Build a pipeline and create its staging root.
    pub fn new(
        config: DocstoreConfig,
        backend: Arc<dyn StorageBackend>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self, DocstoreError> {
        let staging_root = config.staging_root();
        std::fs::create_dir_all(&staging_root).map_err(|source| DocstoreError::Staging {
            path: staging_root.clone(),
            source,
        })?;
        debug!(staging_root = %staging_root.display(), "ingestion pipeline ready");

        Ok(Self {
            validator: Arc::new(Validator::from_config(&config)),
            config: Arc::new(config),
            backend,
            metadata,
            observer: Arc::new(NoopObserver),
            key_generator: Arc::new(generate_storage_key),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the `"{uuid}_{name}"` key scheme, e.g. to force collisions.
    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(generator);
        self
    }

    pub fn config(&self) -> &DocstoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Ingest one upload.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not interrupt a request between a backend write and its cleanup.
    pub async fn ingest(&self, upload: Upload) -> Result<Document, IngestError> {
        let this = self.clone();
        tokio::spawn(async move { this.run(upload).await })
            .await
            .map_err(|e| {
                IngestError::new(
                    Stage::Received,
                    DocstoreError::Internal(format!("Ingest task failed: {}", e)),
                )
            })?
    }

    async fn run(&self, mut upload: Upload) -> Result<Document, IngestError> {
        self.observer.on_stage(None, Stage::Received);

        // 1. Validate
        let accepted = self
            .validator
            .validate(&upload)
            .await
            .map_err(|e| self.fail(None, Stage::Validated, e.into()))?;
        let key = (self.key_generator)(&accepted.display_name);
        let key = key.as_str();
        self.observer.on_stage(Some(key), Stage::Validated);
        debug!(key, name = %accepted.display_name, "upload accepted");

        // 2. Stage
        let staging = StagingArea::create(&self.config.staging_root())
            .await
            .map_err(|e| self.fail(Some(key), Stage::Staged, e))?;
        let body = match upload.body.take() {
            Some(body) => body,
            None => {
                self.discard(key, staging);
                return Err(self.fail(Some(key), Stage::Staged, ValidationError::MissingFile.into()));
            }
        };
        if let Err(e) = staging
            .write_body(key, body, self.validator.max_bytes())
            .await
        {
            self.discard(key, staging);
            return Err(self.fail(Some(key), Stage::Staged, e));
        }
        self.observer.on_stage(Some(key), Stage::Staged);

        // 3. Sanitize
        let artifact = if self.config.sanitize_on_ingest && is_sanitizable(&accepted.extension) {
            let cleaned = staging.cleaned_path(key);
            sanitize_file(&staging.raw_path(key), &cleaned)
                .await
                .map(|report| {
                    debug!(key, removed = ?report.removed, "sanitized");
                    cleaned
                })
        } else {
            staging.pass_through(key).await
        };
        let artifact = match artifact {
            Ok(path) => path,
            Err(e) => {
                self.discard(key, staging);
                return Err(self.fail(Some(key), Stage::Sanitized, e));
            }
        };
        self.observer.on_stage(Some(key), Stage::Sanitized);

        // 4. Store
        let limit = self.config.io_timeout();
        let locator = match tokio::time::timeout(limit, self.backend.put(key, &artifact)).await {
            Ok(Ok(locator)) => locator,
            Ok(Err(e)) => {
                self.discard(key, staging);
                return Err(self.fail(Some(key), Stage::Stored, e.into()));
            }
            Err(_) => {
                self.remove_abandoned(key).await;
                self.discard(key, staging);
                let e = timeout_error(self.backend.name(), "put", limit);
                return Err(self.fail(Some(key), Stage::Stored, e.into()));
            }
        };
        self.observer.on_stage(Some(key), Stage::Stored);

        // 5. Persist
        let new_doc = NewDocument {
            display_name: accepted.display_name,
            storage_key: key.to_string(),
            locator: locator.clone(),
        };
        let doc = match self.metadata.create(new_doc).await {
            Ok(doc) => doc,
            Err(e) => {
                self.remove_object(key, &locator).await;
                self.discard(key, staging);
                return Err(self.fail(Some(key), Stage::Persisted, e));
            }
        };
        self.observer.on_stage(Some(key), Stage::Persisted);

        // 6. Complete
        self.discard(key, staging);
        self.observer.on_stage(Some(key), Stage::Complete);
        info!(id = doc.id, key, locator = %doc.locator, "document ingested");
        Ok(doc)
    }

    fn fail(&self, key: Option<&str>, stage: Stage, error: DocstoreError) -> IngestError {
        if error.is_client_error() {
            info!(key, %stage, error = %error, "upload rejected");
        } else {
            warn!(key, %stage, error = %error, "ingest failed");
        }
        self.observer.on_failure(key, stage, &error);
        IngestError::new(stage, error)
    }

    fn discard(&self, key: &str, staging: StagingArea) {
        let dir = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(key, dir = %dir.display(), error = %e, "failed to remove staging directory");
            self.observer
                .on_cleanup_failed(key, "staging", &format!("{}: {e}", dir.display()));
        }
    }

    async fn remove_object(&self, key: &str, locator: &Locator) {
        let result = timed(
            self.backend.name(),
            "delete",
            self.config.io_timeout(),
            self.backend.delete(locator),
        )
        .await;
        match result {
            Ok(Deletion::Removed) => debug!(key, %locator, "rolled back stored object"),
            Ok(Deletion::Absent) => debug!(key, %locator, "no stored object to roll back"),
            Err(e) => {
                warn!(key, %locator, error = %e, "failed to roll back stored object");
                self.observer.on_cleanup_failed(key, "object", &e.to_string());
            }
        }
    }

    /// Delete whatever a timed-out `put` may have committed under `key`.
    async fn remove_abandoned(&self, key: &str) {
        match self.backend.locator_for(key) {
            Ok(locator) => self.remove_object(key, &locator).await,
            Err(e) => {
                warn!(key, error = %e, "cannot locate abandoned object");
                self.observer.on_cleanup_failed(key, "object", &e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;
    use crate::storage::LocalBackend;
    use tempfile::TempDir;

    async fn pipeline(dir: &TempDir) -> IngestionPipeline {
        let config = DocstoreConfig::builder()
            .upload_root(dir.path().join("uploads"))
            .staging_root(dir.path().join("staging"))
            .allowed_extensions(["txt"])
            .max_upload_bytes(16)
            .build()
            .unwrap();
        let backend = LocalBackend::create(&config.upload_root).await.unwrap();
        IngestionPipeline::new(config, Arc::new(backend), Arc::new(MemoryMetadataStore::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn text_upload_is_stored_unchanged() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        let doc = p
            .ingest(Upload::from_bytes("a.txt", b"dummy data".to_vec()))
            .await
            .unwrap();
        assert_eq!(doc.display_name, "a.txt");
        assert!(doc.storage_key.ends_with("_a.txt"));

        let bytes = p.backend().open(&doc.locator).await.unwrap().read_all().await.unwrap();
        assert_eq!(bytes, b"dummy data");
    }

    #[tokio::test]
    async fn validation_failure_carries_stage() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await;
        let err = p
            .ingest(Upload::from_bytes("a.exe", b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Validated);
        assert_eq!(err.status_code(), 422);
        assert_eq!(std::fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn staging_root_exists_before_first_request() {
        let dir = TempDir::new().unwrap();
        let _p = pipeline(&dir).await;
        assert!(dir.path().join("staging").is_dir());
    }

    #[tokio::test]
    async fn custom_key_generator_is_used() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir).await.with_key_generator(|name| format!("fixed_{name}"));
        let doc = p
            .ingest(Upload::from_bytes("a.txt", b"x".to_vec()))
            .await
            .unwrap();
        assert_eq!(doc.storage_key, "fixed_a.txt");
    }
}

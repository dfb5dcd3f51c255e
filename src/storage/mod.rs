//! Durable byte storage behind one capability trait.
//!
//! Two backends implement [`StorageBackend`] with identical semantics:
//!
//! * [`local::LocalBackend`]: files under an upload root, committed by
//!   no-clobber rename from a temp file in the same directory.
//! * [`remote::RemoteBackend`]: an S3-compatible bucket, committed by a
//!   single-shot `PutObject` (never a visible partial object).
//!
//! The backend is chosen once at startup ([`connect`]) and injected into the
//! pipeline as `Arc<dyn StorageBackend>`.

pub mod local;
pub mod remote;

use crate::config::{BackendConfig, DocstoreConfig};
use crate::document::Locator;
use crate::error::{DocstoreError, StorageError};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Outcome of a delete: the caller may care whether anything was there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    Absent,
}

/// A readable stored object.
///
/// The local backend hands out the committed path; the remote backend
/// downloads into memory. Readers treat both the same way via
/// [`ObjectHandle::read_all`] or by matching on the variant.
#[derive(Debug)]
pub enum ObjectHandle {
    /// Object lives on the local filesystem.
    Local(PathBuf),
    /// Object was fetched into memory.
    Buffered(Vec<u8>),
}

impl ObjectHandle {
    /// Read the whole object.
    pub async fn read_all(&self) -> std::io::Result<Vec<u8>> {
        match self {
            ObjectHandle::Local(path) => tokio::fs::read(path).await,
            ObjectHandle::Buffered(bytes) => Ok(bytes.clone()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ObjectHandle::Local(p) => Some(p),
            ObjectHandle::Buffered(_) => None,
        }
    }
}

/// Uniform put/open/delete contract over a byte store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Commit the file at `source` under `key` and return its locator.
    ///
    /// Must be atomic from a reader's point of view and must not overwrite
    /// an existing object.
    async fn put(&self, key: &str, source: &Path) -> Result<Locator, StorageError>;

    /// Open a committed object. `NotFound` if the locator does not resolve.
    async fn open(&self, locator: &Locator) -> Result<ObjectHandle, StorageError>;

    /// Remove an object. Deleting something absent is not an error, and a
    /// locator this backend does not own counts as absent.
    async fn delete(&self, locator: &Locator) -> Result<Deletion, StorageError>;

    /// Whether the locator resolves to a committed object.
    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError>;

    /// The locator a successful `put(key, ..)` returns, without touching
    /// the store. Lets a caller clean up after a `put` whose outcome it
    /// never saw.
    fn locator_for(&self, key: &str) -> Result<Locator, StorageError>;

    /// Short name for logs and errors.
    fn name(&self) -> &'static str;
}

/// Build the backend selected by `config`.
///
/// The remote backend probes its bucket here; an unreachable store is a
/// startup error rather than a per-request failure.
pub async fn connect(config: &DocstoreConfig) -> Result<Arc<dyn StorageBackend>, DocstoreError> {
    match config.backend {
        BackendConfig::Local => {
            let backend = LocalBackend::create(&config.upload_root).await?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Remote(ref remote) => {
            let backend = RemoteBackend::connect(remote, config.io_timeout()).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Bound a backend call by `limit`; an elapsed timer is `Unreachable`.
pub async fn timed<T, F>(
    backend: &str,
    op: &str,
    limit: Duration,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(backend, op, limit)),
    }
}

pub(crate) fn timeout_error(backend: &str, op: &str, limit: Duration) -> StorageError {
    StorageError::Unreachable {
        backend: backend.to_string(),
        detail: format!("{op} timed out after {}s", limit.as_secs_f64()),
    }
}

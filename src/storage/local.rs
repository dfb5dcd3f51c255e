//! Local filesystem backend.
//!
//! Objects live directly under the upload root as `<root>/<storage_key>`.
//! Writes go to a hidden `.*.partial` temp file in the same directory, are
//! fsynced, then renamed into place without clobbering, so a reader never
//! observes a half-written object under its final name.
//!
//! The copy runs on a blocking thread that outlives a dropped `put` future.
//! A [`WriteGate`] shared with that thread is closed when the future goes
//! away; after that the rename never happens and the temp file is removed.

use super::{Deletion, ObjectHandle, StorageBackend};
use crate::document::Locator;
use crate::error::StorageError;
use async_trait::async_trait;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const BACKEND: &str = "local";
const COPY_CHUNK: usize = 64 * 1024;

/// Filesystem-backed object store rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create the root if needed and canonicalise it.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| io_error(&root.display().to_string(), e))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| io_error(&root.display().to_string(), e))?;
        debug!(root = %root.display(), "local backend ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !key.starts_with('.') => Ok(self.root.join(key)),
            _ => Err(StorageError::WriteFailed {
                backend: BACKEND.to_string(),
                key: key.to_string(),
                detail: "key must be a single plain path segment".to_string(),
            }),
        }
    }

    /// Map a locator to a path under the root, or `None` if it points
    /// anywhere else.
    fn resolve(&self, locator: &Locator) -> Option<PathBuf> {
        match locator {
            Locator::Local { path } => {
                let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
                if path.starts_with(&self.root) && !escapes && path != &self.root {
                    Some(path.clone())
                } else {
                    None
                }
            }
            Locator::Remote { .. } => None,
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    #[tracing::instrument(skip(self, source), fields(backend = BACKEND))]
    async fn put(&self, key: &str, source: &Path) -> Result<Locator, StorageError> {
        let dest = self.object_path(key)?;
        let root = self.root.clone();
        let source = source.to_path_buf();
        let target = dest.clone();
        let gate = WriteGate::default();
        let _close_on_drop = gate.closer();

        tokio::task::spawn_blocking(move || write_atomically(&root, &source, &target, &gate))
            .await
            .map_err(|e| StorageError::WriteFailed {
                backend: BACKEND.to_string(),
                key: key.to_string(),
                detail: format!("write task panicked: {e}"),
            })?
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::WriteFailed {
                    backend: BACKEND.to_string(),
                    key: key.to_string(),
                    detail: "an object with this key already exists".to_string(),
                },
                _ => io_error(key, e),
            })?;

        debug!(path = %dest.display(), "object committed");
        Ok(Locator::Local { path: dest })
    }

    #[tracing::instrument(skip(self), fields(backend = BACKEND))]
    async fn open(&self, locator: &Locator) -> Result<ObjectHandle, StorageError> {
        let path = self.resolve(locator).ok_or_else(|| not_found(locator))?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ObjectHandle::Local(path)),
            Ok(_) => Err(not_found(locator)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(locator)),
            Err(e) => Err(io_error(&locator.to_string(), e)),
        }
    }

    #[tracing::instrument(skip(self), fields(backend = BACKEND))]
    async fn delete(&self, locator: &Locator) -> Result<Deletion, StorageError> {
        let Some(path) = self.resolve(locator) else {
            debug!("delete: locator is outside the upload root");
            return Ok(Deletion::Absent);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(Deletion::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "delete: object already absent");
                Ok(Deletion::Absent)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "delete failed");
                Err(io_error(&locator.to_string(), e))
            }
        }
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError> {
        let Some(path) = self.resolve(locator) else {
            return Ok(false);
        };
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&locator.to_string(), e))
    }

    fn locator_for(&self, key: &str) -> Result<Locator, StorageError> {
        Ok(Locator::Local {
            path: self.object_path(key)?,
        })
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

/// Commit permission shared between a `put` and its blocking writer.
///
/// The writer holds the lock across the final rename, so once
/// [`GateCloser`] has run the object either already exists or never will.
#[derive(Debug, Default, Clone)]
struct WriteGate {
    closed: Arc<Mutex<bool>>,
}

impl WriteGate {
    fn closer(&self) -> GateCloser {
        GateCloser(self.clone())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes the gate when the owning `put` future finishes or is dropped.
struct GateCloser(WriteGate);

impl Drop for GateCloser {
    fn drop(&mut self) {
        *self.0.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

fn abandoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Interrupted, "put abandoned by caller")
}

/// Copy `source` into a temp file beside `dest`, fsync, then rename without
/// clobbering. The temp file is removed on every failure path.
fn write_atomically(
    root: &Path,
    source: &Path,
    dest: &Path,
    gate: &WriteGate,
) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(root)?;
    let mut src = std::fs::File::open(source)?;

    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        if gate.is_closed() {
            return Err(abandoned());
        }
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        tmp.as_file_mut().write_all(&buf[..n])?;
    }
    tmp.as_file().sync_all()?;

    let closed = gate.closed.lock().unwrap_or_else(PoisonError::into_inner);
    if *closed {
        return Err(abandoned());
    }
    tmp.persist_noclobber(dest).map_err(|e| e.error)?;
    drop(closed);
    Ok(())
}

fn not_found(locator: &Locator) -> StorageError {
    StorageError::NotFound {
        locator: locator.to_string(),
    }
}

fn io_error(what: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            backend: BACKEND.to_string(),
            detail: format!("{what}: {e}"),
        },
        _ => StorageError::WriteFailed {
            backend: BACKEND.to_string(),
            key: what.to_string(),
            detail: e.to_string(),
        },
    }
}

//! Per-request staging directory.
//!
//! Every ingest gets its own directory under the staging root. The raw
//! upload is written to `<dir>/<storage_key>` and the artifact handed to the
//! backend is `<dir>/cleaned-<storage_key>`. The directory is removed on
//! [`StagingArea::close`] or, failing that, when the value is dropped.

use super::validate::{BoundedReader, LimitExceeded, UploadBody};
use crate::error::{DocstoreError, ValidationError};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CLEANED_PREFIX: &str = "cleaned-";

#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh `ingest-*` directory under `root`, which must exist.
    pub async fn create(root: &Path) -> Result<Self, DocstoreError> {
        let dir = tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir_in(root)
            .map_err(|source| DocstoreError::Staging {
                path: root.to_path_buf(),
                source,
            })?;
        debug!(dir = %dir.path().display(), "staging directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn raw_path(&self, storage_key: &str) -> PathBuf {
        self.dir.path().join(storage_key)
    }

    pub fn cleaned_path(&self, storage_key: &str) -> PathBuf {
        self.dir.path().join(format!("{CLEANED_PREFIX}{storage_key}"))
    }

    /// Write `body` to the raw artifact path.
    ///
    /// File and stream bodies are read through a [`BoundedReader`]; crossing
    /// `limit` yields `SizeExceeded` and leaves a partial file that the
    /// caller removes with the directory.
    pub async fn write_body(
        &self,
        storage_key: &str,
        body: UploadBody,
        limit: u64,
    ) -> Result<PathBuf, DocstoreError> {
        let path = self.raw_path(storage_key);
        let mut out = tokio::fs::File::create(&path)
            .await
            .map_err(|source| DocstoreError::Staging {
                path: path.clone(),
                source,
            })?;

        let written = match body {
            UploadBody::Bytes(bytes) => out.write_all(&bytes).await.map(|()| bytes.len() as u64),
            UploadBody::File(file) => {
                tokio::io::copy(&mut BoundedReader::new(file, limit), &mut out).await
            }
            UploadBody::Stream(reader) => {
                tokio::io::copy(&mut BoundedReader::new(reader, limit), &mut out).await
            }
        };

        let result = match written {
            Ok(n) => out.sync_all().await.map(|()| n),
            Err(e) => Err(e),
        };

        match result {
            Ok(n) => {
                debug!(path = %path.display(), bytes = n, "upload staged");
                Ok(path)
            }
            Err(e) => match LimitExceeded::from_io(&e) {
                Some(limit) => Err(ValidationError::SizeExceeded { limit }.into()),
                None => Err(DocstoreError::Staging { path, source: e }),
            },
        }
    }

    /// Move the raw artifact to the cleaned path unchanged.
    pub async fn pass_through(&self, storage_key: &str) -> Result<PathBuf, DocstoreError> {
        let dest = self.cleaned_path(storage_key);
        tokio::fs::rename(self.raw_path(storage_key), &dest)
            .await
            .map_err(|source| DocstoreError::Staging {
                path: dest.clone(),
                source,
            })?;
        Ok(dest)
    }

    /// Remove the directory and everything in it.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_removes_directory() {
        let root = TempDir::new().unwrap();
        let area = StagingArea::create(root.path()).await.unwrap();
        let dir = area.path().to_path_buf();
        area.write_body("k_a.txt", UploadBody::Bytes(b"hi".to_vec()), 10)
            .await
            .unwrap();
        area.pass_through("k_a.txt").await.unwrap();
        assert!(dir.join("cleaned-k_a.txt").exists());

        area.close().unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let dir = {
            let area = StagingArea::create(root.path()).await.unwrap();
            area.path().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn stream_over_limit_is_size_exceeded() {
        let root = TempDir::new().unwrap();
        let area = StagingArea::create(root.path()).await.unwrap();
        let body = UploadBody::Stream(Box::new(&b"0123456789"[..]));
        let err = area.write_body("k", body, 4).await.unwrap_err();
        assert!(matches!(
            err,
            DocstoreError::Validation(ValidationError::SizeExceeded { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn missing_root_is_not_created() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("absent");
        let err = StagingArea::create(&missing).await.unwrap_err();
        assert!(matches!(err, DocstoreError::Staging { .. }));
        assert!(!missing.exists());
    }
}

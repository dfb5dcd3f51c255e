//! Configuration types for the ingestion pipeline and storage backends.
//!
//! Everything the core needs is carried by one immutable [`DocstoreConfig`],
//! built through [`DocstoreConfigBuilder`] and handed to the pipeline at
//! construction time. Nothing reads ambient state mid-request.

use crate::error::DocstoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default upload limit: 4 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024;

/// Configuration for document ingestion and retrieval.
///
/// # Example
/// ```rust
/// use docstore::DocstoreConfig;
///
/// let config = DocstoreConfig::builder()
///     .upload_root("/var/lib/docstore")
///     .allowed_extensions(["pdf", "txt"])
///     .max_upload_bytes(8 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert!(config.is_allowed_extension("PDF"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocstoreConfig {
    /// Directory the local backend commits documents into. Default: `uploads`.
    pub upload_root: PathBuf,

    /// Directory per-request staging directories are created in.
    /// Default: `<upload_root>/.staging`.
    pub staging_root: Option<PathBuf>,

    /// Lower-cased extensions accepted by the validator. Default: `{pdf}`.
    pub allowed_extensions: BTreeSet<String>,

    /// Largest accepted upload, inclusive. Default: 4 MiB.
    pub max_upload_bytes: u64,

    /// Run the sanitizer on sanitizable uploads. Default: true.
    pub sanitize_on_ingest: bool,

    /// Which storage backend to commit to. Default: local.
    pub backend: BackendConfig,

    /// Upper bound for a single backend call in seconds. Default: 30.
    pub io_timeout_secs: u64,
}

impl Default for DocstoreConfig {
    fn default() -> Self {
        Self {
            upload_root: PathBuf::from("uploads"),
            staging_root: None,
            allowed_extensions: BTreeSet::from(["pdf".to_string()]),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sanitize_on_ingest: true,
            backend: BackendConfig::Local,
            io_timeout_secs: 30,
        }
    }
}

impl DocstoreConfig {
    /// Create a new builder for `DocstoreConfig`.
    pub fn builder() -> DocstoreConfigBuilder {
        DocstoreConfigBuilder {
            config: Self::default(),
        }
    }

    /// Case-insensitive allow-list lookup.
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.contains(&ext.to_ascii_lowercase())
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_root
            .clone()
            .unwrap_or_else(|| self.upload_root.join(".staging"))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Builder for [`DocstoreConfig`].
#[derive(Debug)]
pub struct DocstoreConfigBuilder {
    config: DocstoreConfig,
}

impl DocstoreConfigBuilder {
    pub fn upload_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.upload_root = path.into();
        self
    }

    pub fn staging_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.staging_root = Some(path.into());
        self
    }

    /// Replace the allow-list. Leading dots are stripped and case folded.
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn sanitize_on_ingest(mut self, v: bool) -> Self {
        self.config.sanitize_on_ingest = v;
        self
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn io_timeout_secs(mut self, secs: u64) -> Self {
        self.config.io_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DocstoreConfig, DocstoreError> {
        let c = &self.config;
        if c.allowed_extensions.is_empty() {
            return Err(DocstoreError::InvalidConfig(
                "At least one allowed extension is required".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(DocstoreError::InvalidConfig(
                "Maximum upload size must be at least 1 byte".into(),
            ));
        }
        if c.io_timeout_secs == 0 {
            return Err(DocstoreError::InvalidConfig(
                "I/O timeout must be at least 1 second".into(),
            ));
        }
        if let BackendConfig::Remote(ref remote) = c.backend {
            remote.validate()?;
        }
        Ok(self.config)
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Storage backend selection, decided once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Commit into `upload_root` on the local filesystem. (default)
    #[default]
    Local,
    /// Commit into an S3-compatible bucket.
    Remote(RemoteConfig),
}

/// Connection settings for an S3-compatible object store (AWS S3, MinIO …).
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint URL. `None` uses the AWS endpoint for `region`.
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub bucket: String,
    /// Optional key prefix, e.g. `documents/`.
    #[serde(default)]
    pub prefix: String,
}

impl RemoteConfig {
    fn validate(&self) -> Result<(), DocstoreError> {
        let missing: Vec<&str> = [
            ("access_key", self.access_key.is_empty()),
            ("secret_key", self.secret_key.is_empty()),
            ("region", self.region.is_empty()),
            ("bucket", self.bucket.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(DocstoreError::InvalidConfig(format!(
                "Remote storage requires {}",
                missing.join(", ")
            )));
        }
        if let Some(ref endpoint) = self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(DocstoreError::InvalidConfig(format!(
                    "Remote endpoint must be an HTTP/HTTPS URL, got '{endpoint}'"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

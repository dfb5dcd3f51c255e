//! Upload validation: the first gate of the ingest pipeline.
//!
//! Checks run in a fixed order and the first failure wins:
//! missing payload, empty filename, disallowed extension, size. Nothing here
//! touches the filesystem except to read a file body's metadata, so a
//! rejected upload leaves no trace.

use crate::config::DocstoreConfig;
use crate::document::{extension_of, secure_filename};
use crate::error::ValidationError;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Payload of an upload.
pub enum UploadBody {
    /// Fully buffered bytes.
    Bytes(Vec<u8>),
    /// An open file; its length is taken from metadata.
    File(tokio::fs::File),
    /// A non-seekable stream of unknown length.
    Stream(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            UploadBody::File(_) => f.write_str("File(..)"),
            UploadBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A single file upload as received from the transport.
#[derive(Debug)]
pub struct Upload {
    /// Client-supplied filename, unsanitised.
    pub filename: String,
    /// Declared media type; informational only.
    pub content_type: Option<String>,
    pub body: Option<UploadBody>,
}

impl Upload {
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            body: Some(UploadBody::Bytes(bytes.into())),
        }
    }

    pub fn from_stream<R>(filename: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self {
            filename: filename.into(),
            content_type: None,
            body: Some(UploadBody::Stream(Box::new(reader))),
        }
    }

    /// Open `path` as a file-backed upload named `filename`.
    pub async fn from_path(
        filename: impl Into<String>,
        path: impl AsRef<std::path::Path>,
    ) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            filename: filename.into(),
            content_type: None,
            body: Some(UploadBody::File(file)),
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// What the validator learned about an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Sanitised filename; never empty.
    pub display_name: String,
    /// Lower-cased extension, guaranteed to be in the allow-list.
    pub extension: String,
    /// Byte length when it could be determined up front.
    pub known_len: Option<u64>,
}

/// Allow-list and size gate.
#[derive(Debug, Clone)]
pub struct Validator {
    allowed: BTreeSet<String>,
    max_bytes: u64,
}

impl Validator {
    pub fn new(allowed: BTreeSet<String>, max_bytes: u64) -> Self {
        Self { allowed, max_bytes }
    }

    pub fn from_config(config: &DocstoreConfig) -> Self {
        Self::new(config.allowed_extensions.clone(), config.max_upload_bytes)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Check `upload` without consuming or advancing its body.
    ///
    /// Stream bodies have no known length; they pass the size check here and
    /// are bounded by [`BoundedReader`] while being staged.
    pub async fn validate(&self, upload: &Upload) -> Result<Accepted, ValidationError> {
        let body = upload.body.as_ref().ok_or(ValidationError::MissingFile)?;

        if upload.filename.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        let display_name = secure_filename(&upload.filename);
        if display_name.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }

        let extension = extension_of(&display_name);
        match extension {
            Some(ref ext) if self.allowed.contains(ext) => {}
            _ => return Err(ValidationError::DisallowedExtension { extension }),
        }

        let known_len = match body {
            UploadBody::Bytes(b) => Some(b.len() as u64),
            // Unreadable metadata is treated like a stream and bounded later.
            UploadBody::File(f) => f.metadata().await.ok().map(|m| m.len()),
            UploadBody::Stream(_) => None,
        };
        if let Some(len) = known_len {
            if len > self.max_bytes {
                return Err(ValidationError::SizeExceeded {
                    limit: self.max_bytes,
                });
            }
        }

        Ok(Accepted {
            display_name,
            extension: extension.unwrap_or_default(),
            known_len,
        })
    }
}

// ── Bounded reader ───────────────────────────────────────────────────────

/// Marker carried inside the `io::Error` a [`BoundedReader`] fails with.
#[derive(Debug)]
pub(crate) struct LimitExceeded {
    pub limit: u64,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream exceeded {} bytes", self.limit)
    }
}

impl std::error::Error for LimitExceeded {}

impl LimitExceeded {
    /// Recover the marker from an I/O error, if that is what it carries.
    pub(crate) fn from_io(e: &io::Error) -> Option<u64> {
        e.get_ref()
            .and_then(|inner| inner.downcast_ref::<LimitExceeded>())
            .map(|l| l.limit)
    }
}

/// Counts bytes as they pass and fails the read that crosses `limit`.
///
/// At most one read chunk past the limit is ever pulled from the inner
/// reader.
pub struct BoundedReader<R> {
    inner: R,
    limit: u64,
    seen: u64,
}

impl<R> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            seen: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.seen
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.seen += (buf.filled().len() - before) as u64;

        if self.seen > self.limit {
            let limit = self.limit;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                LimitExceeded { limit },
            )));
        }
        Poll::Ready(Ok(()))
    }
}

//! S3-compatible object store backend (AWS S3, MinIO, …).
//!
//! Objects are written with a single `PutObject` call, which S3 exposes
//! atomically: until the upload completes nothing is visible under the key.
//! Reads download the whole object into memory.
//!
//! A `PutObject` abandoned on timeout may still land on the server. Callers
//! clean up with [`StorageBackend::locator_for`] and `delete`, which is best
//! effort: a request that lands after that delete is not caught.

use super::{Deletion, ObjectHandle, StorageBackend};
use crate::config::RemoteConfig;
use crate::document::Locator;
use crate::error::StorageError;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BACKEND: &str = "remote";

/// Bucket-backed object store.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl RemoteBackend {
    /// Build a client from `config` and probe the bucket.
    pub async fn connect(config: &RemoteConfig, timeout: Duration) -> Result<Self, StorageError> {
        let backend = Self::from_client(build_client(config, timeout), &config.bucket, &config.prefix);
        backend.probe().await?;
        info!(bucket = %backend.bucket, endpoint = ?config.endpoint, "remote backend ready");
        Ok(backend)
    }

    /// Wrap an already configured client without probing.
    pub fn from_client(client: aws_sdk_s3::Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Object key for a locator in this bucket, or `None`.
    fn resolve<'a>(&self, locator: &'a Locator) -> Option<&'a str> {
        match locator {
            Locator::Remote { bucket, key } if bucket == &self.bucket => Some(key),
            _ => None,
        }
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| match map_sdk_error(e, &self.bucket) {
                // A missing bucket means the store is misconfigured.
                StorageError::NotFound { locator } => StorageError::Unreachable {
                    backend: BACKEND.to_string(),
                    detail: format!("bucket not found: {locator}"),
                },
                other => other,
            })?;
        Ok(())
    }
}

fn build_client(config: &RemoteConfig, timeout: Duration) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        None,
        None,
        "docstore",
    );

    let mut builder = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
        // MinIO and most self-hosted stores only speak path-style addressing.
        .force_path_style(true);

    if let Some(ref endpoint) = config.endpoint {
        builder = builder.endpoint_url(endpoint.clone());
    }

    aws_sdk_s3::Client::from_conf(builder.build())
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    #[tracing::instrument(skip(self, source), fields(backend = BACKEND))]
    async fn put(&self, key: &str, source: &Path) -> Result<Locator, StorageError> {
        let object_key = self.object_key(key);
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::WriteFailed {
                backend: BACKEND.to_string(),
                key: object_key.clone(),
                detail: format!("cannot read staged file: {e}"),
            })?;

        // If-None-Match keeps an existing object from being replaced.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .if_none_match("*")
            .body(body)
            .send()
            .await
            .map_err(|e| match map_sdk_error(e, &object_key) {
                StorageError::NotFound { .. } => StorageError::WriteFailed {
                    backend: BACKEND.to_string(),
                    key: object_key.clone(),
                    detail: format!("bucket '{}' does not exist", self.bucket),
                },
                other => other,
            })?;

        debug!(key = %object_key, "object committed");
        Ok(Locator::Remote {
            bucket: self.bucket.clone(),
            key: object_key,
        })
    }

    #[tracing::instrument(skip(self), fields(backend = BACKEND))]
    async fn open(&self, locator: &Locator) -> Result<ObjectHandle, StorageError> {
        let key = self.resolve(locator).ok_or_else(|| not_found(locator))?;

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    not_found(locator)
                } else {
                    map_sdk_error(e, key)
                }
            })?;

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Unreachable {
                backend: BACKEND.to_string(),
                detail: format!("download of '{key}' interrupted: {e}"),
            })?
            .into_bytes();

        Ok(ObjectHandle::Buffered(bytes.to_vec()))
    }

    #[tracing::instrument(skip(self), fields(backend = BACKEND))]
    async fn delete(&self, locator: &Locator) -> Result<Deletion, StorageError> {
        let Some(key) = self.resolve(locator) else {
            debug!("delete: locator is not in this bucket");
            return Ok(Deletion::Absent);
        };

        // DeleteObject succeeds for missing keys, so check first to report
        // Absent accurately.
        if !self.exists(locator).await? {
            debug!(key, "delete: object already absent");
            return Ok(Deletion::Absent);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(Deletion::Removed)
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, StorageError> {
        let Some(key) = self.resolve(locator) else {
            return Ok(false);
        };
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => match map_sdk_error(e, key) {
                StorageError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    fn locator_for(&self, key: &str) -> Result<Locator, StorageError> {
        Ok(Locator::Remote {
            bucket: self.bucket.clone(),
            key: self.object_key(key),
        })
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

/// Coarse classification of an SDK failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Unreachable,
    PermissionDenied,
    NotFound,
    Rejected,
}

fn classify(transport_failure: bool, status: Option<u16>) -> FailureClass {
    if transport_failure {
        return FailureClass::Unreachable;
    }
    match status {
        Some(401) | Some(403) => FailureClass::PermissionDenied,
        Some(404) => FailureClass::NotFound,
        Some(s) if s >= 500 => FailureClass::Unreachable,
        None => FailureClass::Unreachable,
        _ => FailureClass::Rejected,
    }
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transport_failure = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    );
    let status = err.raw_response().map(|r| r.status().as_u16());
    let detail = DisplayErrorContext(&err).to_string();

    match classify(transport_failure, status) {
        FailureClass::Unreachable => StorageError::Unreachable {
            backend: BACKEND.to_string(),
            detail,
        },
        FailureClass::PermissionDenied => StorageError::PermissionDenied {
            backend: BACKEND.to_string(),
            detail,
        },
        FailureClass::NotFound => StorageError::NotFound {
            locator: key.to_string(),
        },
        FailureClass::Rejected => StorageError::WriteFailed {
            backend: BACKEND.to_string(),
            key: key.to_string(),
            detail,
        },
    }
}

fn not_found(locator: &Locator) -> StorageError {
    StorageError::NotFound {
        locator: locator.to_string(),
    }
}

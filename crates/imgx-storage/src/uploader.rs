//! Storage uploader.
//!
//! Transfers file bytes to object storage using an issued credential.
//! Form-field credentials are sent as a multipart POST, presigned URLs as
//! a raw PUT. Progress is reported as whole percentages while the body is
//! streamed to the transport.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::{debug, info};

use imgx_models::{SourceFile, UploadTarget};

use crate::error::{StorageError, StorageResult};

/// Body chunk size used for progress granularity.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Progress reporter for one upload.
///
/// Emits each whole percentage at most once, never decreasing, and goes
/// silent once the upload has resolved.
#[derive(Clone)]
pub struct UploadProgress {
    inner: Arc<ProgressInner>,
}

struct ProgressInner {
    callback: Box<dyn Fn(u8) + Send + Sync>,
    last: AtomicU8,
    closed: AtomicBool,
}

impl UploadProgress {
    pub fn new(callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                callback: Box::new(callback),
                last: AtomicU8::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A reporter that discards updates.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    /// Report a percentage. Values that do not advance are dropped.
    pub fn report(&self, percent: u8) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let percent = percent.min(100);
        let previous = self.inner.last.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            (self.inner.callback)(percent);
        }
    }

    /// Stop emitting. Called once the upload reaches a terminal result.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn last_reported(&self) -> u8 {
        self.inner.last.load(Ordering::Acquire)
    }
}

/// Transfers bytes to object storage.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload one file using the given credential.
    async fn upload(&self, target: &UploadTarget, file: &SourceFile, progress: &UploadProgress) -> StorageResult<()>;
}

/// reqwest-backed uploader.
#[derive(Clone)]
pub struct StorageUploader {
    http: Client,
}

impl StorageUploader {
    pub fn new(timeout: Duration) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StorageError::Network)?;

        Ok(Self { http })
    }

    /// Create an uploader with a caller-supplied HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn send(&self, target: &UploadTarget, file: &SourceFile, progress: &UploadProgress) -> StorageResult<()> {
        let length = file.size_bytes();
        let body = progress_body(file.bytes.clone(), progress.clone());

        let request = if target.is_form_upload() {
            let mut form = Form::new();
            for (name, value) in &target.form_fields {
                form = form.text(name.clone(), value.clone());
            }

            let part = Part::stream_with_length(body, length)
                .file_name(file.name.clone())
                .mime_str(&file.content_type)
                .map_err(|e| StorageError::upload_failed(format!("invalid content type: {}", e)))?;
            // Storage services require the file to be the last form field.
            form = form.part("file", part);

            self.http.post(&target.write_url).multipart(form)
        } else {
            self.http
                .put(&target.write_url)
                .header(CONTENT_TYPE, file.content_type.as_str())
                .header(CONTENT_LENGTH, length)
                .body(body)
        };

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_failed(format!(
                "storage returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectUploader for StorageUploader {
    async fn upload(&self, target: &UploadTarget, file: &SourceFile, progress: &UploadProgress) -> StorageResult<()> {
        debug!("Uploading {} ({} bytes) to {}", file.name, file.size_bytes(), target.destination_key);

        let result = self.send(target, file, progress).await;
        if result.is_ok() {
            progress.report(100);
            info!("Uploaded {} to {}", file.name, target.destination_key);
        }
        progress.close();
        result
    }
}

/// Wrap bytes in a streaming body that reports progress per chunk handed
/// to the transport.
fn progress_body(bytes: Bytes, progress: UploadProgress) -> Body {
    let total = bytes.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(total)))
        .collect();

    let mut sent = 0usize;
    let chunks = chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        // 100 is reserved for a confirmed response.
        progress.report((sent * 100 / total).min(99) as u8);
        Ok::<Bytes, std::io::Error>(chunk)
    });

    Body::wrap_stream(stream::iter(chunks))
}

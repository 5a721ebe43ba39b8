//! R2 presigning issuer.
//!
//! Issues presigned PUT targets directly against an S3-compatible bucket,
//! for deployments that sign uploads in-process instead of calling a
//! remote issuer.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use imgx_models::{UploadRequest, UploadTarget, DEFAULT_CREDENTIAL_LIFETIME_SECS};

use crate::error::{StorageError, StorageResult};
use crate::issuer::UploadTargetIssuer;

/// Default maximum object size accepted for upload (25 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Largest object a credential is issued for
    pub max_upload_bytes: u64,
    /// Lifetime of issued upload URLs
    pub upload_expiry: Duration,
    /// Key prefix for uploaded originals
    pub key_prefix: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            max_upload_bytes: std::env::var("R2_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            upload_expiry: Duration::from_secs(
                std::env::var("R2_UPLOAD_EXPIRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CREDENTIAL_LIFETIME_SECS),
            ),
            key_prefix: std::env::var("R2_UPLOAD_PREFIX").unwrap_or_else(|_| "uploads".to_string()),
        })
    }
}

/// Cloudflare R2 client that signs upload URLs.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    max_upload_bytes: u64,
    upload_expiry: Duration,
    key_prefix: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        Ok(Self {
            client,
            bucket: config.bucket_name,
            max_upload_bytes: config.max_upload_bytes,
            upload_expiry: config.upload_expiry,
            key_prefix: config.key_prefix,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = R2Config::from_env()?;
        Self::new(config).await
    }

    /// Generate a presigned URL for PUT.
    pub async fn presign_put(&self, key: &str, content_type: Option<&str>, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let mut request = self.client.put_object().bucket(&self.bucket).key(key);
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        let presigned = request
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Destination key for an upload: `{prefix}/{uuid}/{sanitized name}`.
    pub fn upload_key(&self, file_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.key_prefix.trim_end_matches('/'),
            Uuid::new_v4().simple(),
            sanitize_file_name(file_name)
        )
    }
}

#[async_trait]
impl UploadTargetIssuer for R2Client {
    async fn acquire_upload_target(&self, file_name: &str, size_bytes: u64) -> StorageResult<UploadTarget> {
        UploadRequest::new(file_name, size_bytes).validate()?;

        if size_bytes > self.max_upload_bytes {
            return Err(StorageError::invalid_request(format!(
                "{} is {} bytes, the limit is {} bytes",
                file_name, size_bytes, self.max_upload_bytes
            )));
        }

        let key = self.upload_key(file_name);
        debug!("Presigning upload of {} to {}", file_name, key);

        let url = self.presign_put(&key, None, self.upload_expiry).await?;
        info!("Issued upload target for {}", key);

        Ok(UploadTarget::new(
            url,
            BTreeMap::new(),
            key,
            self.upload_expiry.as_secs(),
        ))
    }
}

/// Keep a file name safe for use as the last segment of an object key.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

//! Upload-credential client.
//!
//! Requests a time-limited, size-bounded write credential (and destination
//! key) for one file. Failures are returned as-is; retrying is the
//! caller's decision.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, warn};
use validator::Validate;

use imgx_models::{UploadRequest, UploadTarget};

use crate::error::{StorageError, StorageResult};

/// Source of write credentials for object storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadTargetIssuer: Send + Sync {
    /// Acquire a write credential for one file.
    async fn acquire_upload_target(&self, file_name: &str, size_bytes: u64) -> StorageResult<UploadTarget>;
}

/// Acquire a credential that is still valid now, re-acquiring once if the
/// first one has already expired.
pub async fn acquire_fresh_target(
    issuer: &dyn UploadTargetIssuer,
    file_name: &str,
    size_bytes: u64,
) -> StorageResult<UploadTarget> {
    let target = issuer.acquire_upload_target(file_name, size_bytes).await?;
    if !target.is_expired(Utc::now()) {
        return Ok(target);
    }

    warn!(file = %file_name, "Upload credential expired before use, re-acquiring");
    let target = issuer.acquire_upload_target(file_name, size_bytes).await?;
    if target.is_expired(Utc::now()) {
        return Err(StorageError::CredentialExpired(file_name.to_string()));
    }
    Ok(target)
}

/// Configuration for the HTTP issuer client.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Base URL of the credential issuer
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl IssuerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("UPLOAD_ISSUER_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api".to_string()),
            timeout: Duration::from_secs(
                std::env::var("UPLOAD_ISSUER_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Client for a remote credential issuer.
pub struct IssuerClient {
    http: Client,
    config: IssuerConfig,
}

impl IssuerClient {
    pub fn new(config: IssuerConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StorageError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(IssuerConfig::from_env())
    }
}

#[async_trait]
impl UploadTargetIssuer for IssuerClient {
    async fn acquire_upload_target(&self, file_name: &str, size_bytes: u64) -> StorageResult<UploadTarget> {
        let request = UploadRequest::new(file_name, size_bytes);
        request.validate()?;

        let url = format!("{}/uploads/presign", self.config.base_url.trim_end_matches('/'));
        debug!("Requesting upload target for {} ({} bytes)", file_name, size_bytes);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| StorageError::acquire_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::acquire_failed(format!(
                "issuer returned {}: {}",
                status, body
            )));
        }

        let target: UploadTarget = response
            .json()
            .await
            .map_err(|e| StorageError::acquire_failed(format!("invalid issuer response: {}", e)))?;

        if target.write_url.is_empty() || target.destination_key.is_empty() {
            return Err(StorageError::acquire_failed(
                "issuer response is missing the write URL or destination key",
            ));
        }

        Ok(target)
    }
}

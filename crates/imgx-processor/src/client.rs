//! Processing service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use imgx_models::{JobId, JobState};

use crate::backend::ProcessingBackend;
use crate::error::{ProcessorError, ProcessorResult};
use crate::types::{DispatchEntry, DispatchReply, DispatchResponse, StatusResponse};

/// Configuration for the processing client.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Base URL of the processing service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(120), // batch uploads carry full images
        }
    }
}

impl ProcessorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PROCESSOR_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("PROCESSOR_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// Client for the processing service.
pub struct ProcessorClient {
    http: Client,
    config: ProcessorConfig,
}

impl ProcessorClient {
    /// Create a new processing client.
    pub fn new(config: ProcessorConfig) -> ProcessorResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProcessorError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProcessorResult<Self> {
        Self::new(ProcessorConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn build_form(entries: &[DispatchEntry]) -> ProcessorResult<Form> {
        let mut form = Form::new();

        for (index, entry) in entries.iter().enumerate() {
            let metadata = serde_json::to_string(&entry.metadata())?;
            let file = Part::stream_with_length(Body::from(entry.bytes.clone()), entry.bytes.len() as u64)
                .file_name(entry.original_file_name.clone())
                .mime_str(&entry.content_type)?;

            form = form
                .part(format!("file_{}", index), file)
                .text(format!("meta_{}", index), metadata);
        }

        Ok(form)
    }
}

#[async_trait]
impl ProcessingBackend for ProcessorClient {
    async fn dispatch(&self, entries: &[DispatchEntry]) -> ProcessorResult<Vec<DispatchReply>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("/v1/jobs");
        debug!("Dispatching {} items to {}", entries.len(), url);

        // Not retried: a resend could create duplicate jobs.
        let response = self
            .http
            .post(&url)
            .multipart(Self::build_form(entries)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::from_http_status(status, &body));
        }

        let body: DispatchResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;

        Ok(body.results)
    }

    async fn query_status(&self, job_id: &JobId, cancel: &CancellationToken) -> ProcessorResult<JobState> {
        let url = self.url(&format!("/v1/jobs/{}", job_id));

        let query = async {
            let response = self.http.get(&url).send().await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ProcessorError::from_http_status(status, &body));
            }

            let status: StatusResponse = response
                .json()
                .await
                .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
            Ok::<JobState, ProcessorError>(status.into_job_state())
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ProcessorError::Cancelled),
            result = query => result,
        }
    }
}

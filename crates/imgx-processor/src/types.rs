//! Processing service request/response types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use imgx_models::{
    AspectRatio, Dimensions, JobId, JobState, ProcessingMethod, ProcessingOptions, ResultRef,
};

/// Reply code: accepted (dispatch) or complete (status).
pub const CODE_OK: i32 = 0;

/// Status code: the job is still processing.
pub const CODE_PROCESSING: i32 = 1;

/// One item of a dispatch request.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub job_id: JobId,
    pub source_key: String,
    pub original_file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub dimensions: Option<Dimensions>,
    pub options: ProcessingOptions,
}

impl DispatchEntry {
    /// Metadata block sent alongside the file bytes.
    pub fn metadata(&self) -> JobMetadata {
        JobMetadata {
            job_id: self.job_id.clone(),
            source_key: self.source_key.clone(),
            original_name: self.original_file_name.clone(),
            width: self.dimensions.map(|d| d.width),
            height: self.dimensions.map(|d| d.height),
            method: self.options.method(),
            upscale_factor: self.options.upscale_factor().map(|f| f.multiplier()),
            aspect_ratio: self.options.aspect_ratio(),
            target_resolution: self.options.target_resolution().map(|r| r.pixels()),
        }
    }
}

/// Per-item metadata part of a dispatch request.
///
/// Method-specific parameters are omitted for the other methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub job_id: JobId,
    pub source_key: String,
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub method: ProcessingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upscale_factor: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resolution: Option<u32>,
}

/// Body of a dispatch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    #[serde(default)]
    pub results: Vec<DispatchReply>,
}

/// Backend verdict for one dispatched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReply {
    pub job_id: JobId,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

impl DispatchReply {
    pub fn is_accepted(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Body of a status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub code: i32,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusResponse {
    /// Classify the reply. Unknown codes are failures, never "keep waiting".
    pub fn into_job_state(self) -> JobState {
        match self.code {
            CODE_OK => JobState::Completed(
                self.result_url
                    .filter(|url| !url.is_empty())
                    .map(ResultRef::new),
            ),
            CODE_PROCESSING => JobState::Pending,
            code => JobState::Failed(match self.message {
                Some(message) if !message.is_empty() => message,
                _ => format!("Processing failed with status code {}", code),
            }),
        }
    }
}

//! Processing backend seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use imgx_models::{JobId, JobState};

use crate::error::ProcessorResult;
use crate::types::{DispatchEntry, DispatchReply};

/// External service that performs the image transformations.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Submit a batch of items in one request.
    ///
    /// `Err` means the whole request failed; per-item rejections come back
    /// as replies with a non-zero code.
    async fn dispatch(&self, entries: &[DispatchEntry]) -> ProcessorResult<Vec<DispatchReply>>;

    /// Query the state of one job. Implementations must stop and return
    /// `ProcessorError::Cancelled` once `cancel` fires.
    async fn query_status(&self, job_id: &JobId, cancel: &CancellationToken) -> ProcessorResult<JobState>;
}

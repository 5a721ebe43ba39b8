//! Job identifiers, handles and poll states.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::result::ResultRef;

/// Identifier of one external processing job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh job ID: millisecond timestamp plus a random suffix.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..10]))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ties one queued item to one in-flight external job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: JobId,
    /// Position of the item in its batch
    pub item_index: usize,
    pub original_file_name: String,
    /// Result location announced at dispatch time, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_hint: Option<ResultRef>,
    pub dispatched_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: JobId, item_index: usize, original_file_name: impl Into<String>) -> Self {
        Self {
            job_id,
            item_index,
            original_file_name: original_file_name.into(),
            result_hint: None,
            dispatched_at: Utc::now(),
        }
    }

    pub fn with_result_hint(mut self, hint: Option<ResultRef>) -> Self {
        self.result_hint = hint;
        self
    }
}

/// State of an external job as reported by one status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobState {
    /// Still processing
    Pending,
    /// Finished. The location may be missing if the backend omitted it.
    Completed(Option<ResultRef>),
    /// The backend reports the job itself failed
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

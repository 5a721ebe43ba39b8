//! Per-item results consumed by reporting and export.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::item::{ItemStatus, QueuedItem};

/// Location of a processed result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one item, in enqueue order within a batch result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub original_file_name: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
}

impl ItemResult {
    /// Project an item into its reported result.
    pub fn from_item(item: &QueuedItem) -> Self {
        let (success, message) = match item.status() {
            ItemStatus::Completed => (true, "Processed successfully".to_string()),
            ItemStatus::Failed => (
                false,
                item.error_detail().unwrap_or("Processing failed").to_string(),
            ),
            other => (false, format!("Not finished ({})", other)),
        };

        Self {
            original_file_name: item.original_file_name().to_string(),
            success,
            message,
            result_ref: item.processed_result_ref().cloned(),
        }
    }
}

//! Queued item and its status lifecycle.

use bytes::Bytes;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::options::{ProcessingMethod, ProcessingOptions};
use crate::result::ResultRef;

/// Pixel dimensions of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Status of a queued item.
///
/// `queued -> uploading -> dispatched -> polling -> completed`, with
/// `failed` reachable from every in-flight state. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Queued,
    Uploading,
    Dispatched,
    Polling,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Dispatched => "dispatched",
            ItemStatus::Polling => "polling",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Whether the item is somewhere between upload and resolution.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ItemStatus::Uploading | ItemStatus::Dispatched | ItemStatus::Polling
        )
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        match (self, next) {
            (ItemStatus::Queued, ItemStatus::Uploading)
            | (ItemStatus::Uploading, ItemStatus::Dispatched)
            | (ItemStatus::Dispatched, ItemStatus::Polling)
            | (ItemStatus::Polling, ItemStatus::Completed) => true,
            (from, ItemStatus::Failed) => from.is_in_flight(),
            _ => false,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A file handed to the pipeline by the caller.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// One file awaiting or undergoing processing.
///
/// State is only changed through the methods below, which enforce the
/// status machine and the set-once fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    original_file_name: String,
    size_bytes: u64,
    content_type: String,
    #[serde(skip)]
    bytes: Bytes,
    source_key: String,
    dimensions: Option<Dimensions>,
    processing_options: Option<ProcessingOptions>,
    status: ItemStatus,
    upload_progress: u8,
    processed_result_ref: Option<ResultRef>,
    error_detail: Option<String>,
}

impl QueuedItem {
    /// Create a new queued item from a source file.
    pub fn new(file: SourceFile) -> Self {
        Self {
            size_bytes: file.size_bytes(),
            original_file_name: file.name,
            content_type: file.content_type,
            bytes: file.bytes,
            source_key: String::new(),
            dimensions: None,
            processing_options: None,
            status: ItemStatus::Queued,
            upload_progress: 0,
            processed_result_ref: None,
            error_detail: None,
        }
    }

    pub fn original_file_name(&self) -> &str {
        &self.original_file_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub fn processing_options(&self) -> Option<ProcessingOptions> {
        self.processing_options
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn upload_progress(&self) -> u8 {
        self.upload_progress
    }

    pub fn processed_result_ref(&self) -> Option<&ResultRef> {
        self.processed_result_ref.as_ref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Source file view of this item (cheap, bytes are reference counted).
    pub fn source_file(&self) -> SourceFile {
        SourceFile {
            name: self.original_file_name.clone(),
            content_type: self.content_type.clone(),
            bytes: self.bytes.clone(),
        }
    }

    /// Replace the processing options. Only allowed before upload starts.
    pub fn set_options(&mut self, options: ProcessingOptions) -> ModelResult<()> {
        if self.status != ItemStatus::Queued {
            return Err(ModelError::OptionsLocked(self.original_file_name.clone()));
        }
        self.processing_options = Some(options);
        Ok(())
    }

    /// Select a method, discarding the previous method's parameters.
    pub fn select_method(&mut self, method: ProcessingMethod) -> ModelResult<()> {
        let options = match self.processing_options {
            Some(current) => current.with_method(method),
            None => ProcessingOptions::defaults_for(method),
        };
        self.set_options(options)
    }

    /// Record measured dimensions. Set once, never recomputed.
    pub fn set_dimensions(&mut self, dimensions: Dimensions) -> ModelResult<()> {
        if self.dimensions.is_some() {
            return Err(ModelError::DimensionsAlreadySet(self.original_file_name.clone()));
        }
        self.dimensions = Some(dimensions);
        Ok(())
    }

    fn transition(&mut self, next: ItemStatus) -> ModelResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                file: self.original_file_name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn begin_upload(&mut self) -> ModelResult<()> {
        self.transition(ItemStatus::Uploading)
    }

    /// Record fractional upload progress. Ignored unless uploading and
    /// never decreases. Returns whether the value changed.
    pub fn record_upload_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != ItemStatus::Uploading || percent <= self.upload_progress {
            return false;
        }
        self.upload_progress = percent;
        true
    }

    /// Record the storage key assigned at credential acquisition.
    pub fn assign_source_key(&mut self, key: impl Into<String>) {
        self.source_key = key.into();
    }

    pub fn mark_dispatched(&mut self) -> ModelResult<()> {
        self.transition(ItemStatus::Dispatched)
    }

    pub fn mark_polling(&mut self) -> ModelResult<()> {
        self.transition(ItemStatus::Polling)
    }

    /// Mark completed with the processed result reference.
    pub fn complete(&mut self, result_ref: ResultRef) -> ModelResult<()> {
        self.transition(ItemStatus::Completed)?;
        self.processed_result_ref = Some(result_ref);
        Ok(())
    }

    /// Mark failed with an error detail.
    pub fn fail(&mut self, detail: impl Into<String>) -> ModelResult<()> {
        self.transition(ItemStatus::Failed)?;
        self.error_detail = Some(detail.into());
        Ok(())
    }

    /// Fail a queued or in-flight item when the whole batch aborts.
    /// Returns false if the item was already terminal.
    pub fn abort(&mut self, detail: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Failed;
        self.error_detail = Some(detail.into());
        true
    }

    /// Reset a failed item so it can run again from scratch.
    pub fn reset_for_retry(&mut self) -> ModelResult<()> {
        if self.status != ItemStatus::Failed {
            return Err(ModelError::InvalidTransition {
                file: self.original_file_name.clone(),
                from: self.status,
                to: ItemStatus::Queued,
            });
        }
        self.status = ItemStatus::Queued;
        self.source_key.clear();
        self.upload_progress = 0;
        self.processed_result_ref = None;
        self.error_detail = None;
        Ok(())
    }
}

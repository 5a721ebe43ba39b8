//! Shared data models for the imgx transform pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Queued items and their status lifecycle
//! - Processing options (upscale, uncrop, square)
//! - Job identifiers, handles and poll states
//! - Batch progress and result reporting
//! - Upload credentials issued by the storage layer

pub mod error;
pub mod item;
pub mod job;
pub mod options;
pub mod progress;
pub mod result;
pub mod upload;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use item::{Dimensions, ItemStatus, QueuedItem, SourceFile};
pub use job::{JobHandle, JobId, JobState};
pub use options::{AspectRatio, ProcessingMethod, ProcessingOptions, TargetResolution, UpscaleFactor};
pub use progress::{BatchProgress, BatchStage};
pub use result::{ItemResult, ResultRef};
pub use upload::{UploadRequest, UploadTarget, DEFAULT_CREDENTIAL_LIFETIME_SECS};

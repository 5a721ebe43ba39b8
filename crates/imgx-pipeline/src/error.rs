//! Pipeline error types.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} is already in the batch")]
    DuplicateItem(String),

    #[error("Another file named {0} is already in the batch")]
    NameConflict(String),

    #[error("No item at index {0}")]
    ItemNotFound(usize),

    #[error("{0} is being processed and cannot be changed")]
    ItemBusy(String),

    #[error("No processing method selected for {0}")]
    MissingOptions(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    Model(#[from] imgx_models::ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] imgx_storage::StorageError),

    #[error("Processor error: {0}")]
    Processor(#[from] imgx_processor::ProcessorError),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn dispatch_failed(msg: impl Into<String>) -> Self {
        Self::DispatchFailed(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

//! Model error types.

use thiserror::Error;

use crate::item::ItemStatus;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when a model invariant would be violated.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid status transition for {file}: {from} -> {to}")]
    InvalidTransition {
        file: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Invalid processing option: {0}")]
    InvalidOption(String),

    #[error("Dimensions already measured for {0}")]
    DimensionsAlreadySet(String),

    #[error("Options can only change while queued: {0}")]
    OptionsLocked(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ModelError {
    pub fn invalid_option(msg: impl Into<String>) -> Self {
        Self::InvalidOption(msg.into())
    }
}

//! Processing client error types.

use thiserror::Error;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processing service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcessorError {
    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            502..=504 => Self::ServiceUnavailable(format!("{}: {}", status, body)),
            _ => Self::RequestFailed(format!("service returned {}: {}", status, body)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessorError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        assert!(matches!(
            ProcessorError::from_http_status(503, "down"),
            ProcessorError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            ProcessorError::from_http_status(500, "boom"),
            ProcessorError::RequestFailed(_)
        ));
    }

    #[test]
    fn test_cancelled() {
        assert!(ProcessorError::Cancelled.is_cancelled());
        assert!(!ProcessorError::from_http_status(500, "boom").is_cancelled());
    }
}

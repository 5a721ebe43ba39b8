//! Pipeline configuration.

use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wait before each status query
    pub poll_interval: Duration,
    /// Status queries that may come back pending or fail in transport
    pub max_poll_attempts: u32,
    /// Queries that may be abandoned because the next tick arrived first
    pub max_superseded: u32,
    /// Maximum uploads in flight at once
    pub max_concurrent_uploads: usize,
    /// Maximum jobs polled at once
    pub max_concurrent_polls: usize,
    /// Timeout for a single storage upload
    pub upload_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(4000),
            max_poll_attempts: 7,
            max_superseded: 7,
            max_concurrent_uploads: 4,
            max_concurrent_polls: 4,
            upload_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                std::env::var("IMGX_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(4000),
            ),
            max_poll_attempts: std::env::var("IMGX_POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_poll_attempts),
            max_superseded: std::env::var("IMGX_POLL_MAX_SUPERSEDED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_superseded),
            max_concurrent_uploads: std::env::var("IMGX_MAX_CONCURRENT_UPLOADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_uploads),
            max_concurrent_polls: std::env::var("IMGX_MAX_CONCURRENT_POLLS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_polls),
            upload_timeout: Duration::from_secs(
                std::env::var("IMGX_UPLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Upper bound on how long one job can be polled.
    pub fn max_poll_duration(&self) -> Duration {
        self.poll_interval * (self.max_poll_attempts + self.max_superseded)
    }

    // A zero limit would stall `buffer_unordered`.
    pub(crate) fn upload_concurrency(&self) -> usize {
        self.max_concurrent_uploads.max(1)
    }

    pub(crate) fn poll_concurrency(&self) -> usize {
        self.max_concurrent_polls.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(4));
        assert_eq!(config.max_poll_attempts, 7);
        assert_eq!(config.max_poll_duration(), Duration::from_secs(56));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = PipelineConfig {
            max_concurrent_uploads: 0,
            max_concurrent_polls: 0,
            ..Default::default()
        };
        assert_eq!(config.upload_concurrency(), 1);
        assert_eq!(config.poll_concurrency(), 1);
    }
}

//! Pipeline metrics.
//!
//! - Item outcomes by stage
//! - Status queries by outcome
//! - Dispatch latency and batch size

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Items reaching a terminal state, by outcome and failing stage.
    pub const ITEMS_TOTAL: &str = "imgx_items_total";

    /// Status queries issued, by outcome.
    pub const POLL_QUERIES_TOTAL: &str = "imgx_poll_queries_total";

    /// Dispatch request latency in seconds.
    pub const DISPATCH_LATENCY_SECONDS: &str = "imgx_dispatch_latency_seconds";

    /// Items per dispatch request.
    pub const DISPATCH_BATCH_SIZE: &str = "imgx_dispatch_batch_size";
}

/// Record an item reaching a terminal state.
pub fn record_item_outcome(stage: &str, success: bool) {
    counter!(
        names::ITEMS_TOTAL,
        "stage" => stage.to_string(),
        "outcome" => if success { "completed" } else { "failed" }
    )
    .increment(1);
}

/// Record the outcome of one status query
/// ("pending", "completed", "failed", "error", "superseded").
pub fn record_poll_query(outcome: &'static str) {
    counter!(names::POLL_QUERIES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a dispatch request.
pub fn record_dispatch(items: usize, latency_ms: f64, success: bool) {
    histogram!(
        names::DISPATCH_LATENCY_SECONDS,
        "status" => if success { "ok" } else { "error" }
    )
    .record(latency_ms / 1000.0);

    histogram!(names::DISPATCH_BATCH_SIZE).record(items as f64);
}

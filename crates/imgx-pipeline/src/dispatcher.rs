//! Batch dispatcher.
//!
//! Packages every uploaded item into one request to the processing
//! backend and maps the replies back to items by job id. Items are not
//! mutated here; the orchestrator applies the results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use imgx_models::{JobHandle, JobId, QueuedItem, ResultRef};
use imgx_processor::{DispatchEntry, DispatchReply, ProcessingBackend};

use crate::metrics;

/// Message given to every item when the whole request fails.
pub const DISPATCH_FAILURE_MESSAGE: &str = "Processing failed";

/// Message for an item the backend's reply left out.
pub const NO_REPLY_MESSAGE: &str = "No response from processing backend";

/// Outcome of dispatching one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Accepted(JobHandle),
    Rejected { error: String },
}

impl DispatchResult {
    fn rejected(error: impl Into<String>) -> Self {
        Self::Rejected { error: error.into() }
    }
}

/// Per-item results of one dispatch call, plus the request error when the
/// call itself failed. On a request error every sent item is rejected with
/// [`DISPATCH_FAILURE_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub results: Vec<DispatchResult>,
    pub request_error: Option<String>,
}

#[derive(Clone)]
pub struct BatchDispatcher {
    backend: Arc<dyn ProcessingBackend>,
}

impl BatchDispatcher {
    pub fn new(backend: Arc<dyn ProcessingBackend>) -> Self {
        Self { backend }
    }

    /// Dispatch `(batch index, item)` pairs in one request. Returns one
    /// result per input, in input order.
    pub async fn dispatch(&self, items: &[(usize, &QueuedItem)]) -> DispatchOutcome {
        let mut request_error = None;
        let mut results: Vec<Option<DispatchResult>> = Vec::with_capacity(items.len());
        let mut entries = Vec::new();
        let mut positions = Vec::new();

        for (position, (_, item)) in items.iter().enumerate() {
            match item.processing_options() {
                Some(options) => {
                    entries.push(DispatchEntry {
                        job_id: JobId::generate(),
                        source_key: item.source_key().to_string(),
                        original_file_name: item.original_file_name().to_string(),
                        content_type: item.content_type().to_string(),
                        bytes: item.bytes().clone(),
                        dimensions: item.dimensions(),
                        options,
                    });
                    positions.push(position);
                    results.push(None);
                }
                None => results.push(Some(DispatchResult::rejected(format!(
                    "No processing method selected for {}",
                    item.original_file_name()
                )))),
            }
        }

        if !entries.is_empty() {
            let started = Instant::now();
            let response = self.backend.dispatch(&entries).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::record_dispatch(entries.len(), latency_ms, response.is_ok());

            match response {
                Ok(replies) => {
                    info!("Dispatched {} items, {} replies", entries.len(), replies.len());
                    let mut replies: HashMap<JobId, DispatchReply> =
                        replies.into_iter().map(|r| (r.job_id.clone(), r)).collect();

                    for (entry, &position) in entries.iter().zip(&positions) {
                        let index = items[position].0;
                        results[position] = Some(match replies.remove(&entry.job_id) {
                            Some(reply) if reply.is_accepted() => DispatchResult::Accepted(
                                JobHandle::new(entry.job_id.clone(), index, &entry.original_file_name)
                                    .with_result_hint(reply.result_url.filter(|u| !u.is_empty()).map(ResultRef::new)),
                            ),
                            Some(reply) => {
                                warn!(job_id = %entry.job_id, code = reply.code, "Item rejected at dispatch");
                                DispatchResult::rejected(reply.message.filter(|m| !m.is_empty()).unwrap_or_else(
                                    || format!("Rejected by processing backend (code {})", reply.code),
                                ))
                            }
                            None => {
                                warn!(job_id = %entry.job_id, "Dispatch reply missing for item");
                                DispatchResult::rejected(NO_REPLY_MESSAGE)
                            }
                        });
                    }
                }
                Err(e) => {
                    error!(error = %e, "Dispatch request failed for {} items", entries.len());
                    for &position in &positions {
                        results[position] = Some(DispatchResult::rejected(DISPATCH_FAILURE_MESSAGE));
                    }
                    request_error = Some(e.to_string());
                }
            }
        }

        DispatchOutcome {
            results: results
                .into_iter()
                .map(|r| r.unwrap_or_else(|| DispatchResult::rejected(DISPATCH_FAILURE_MESSAGE)))
                .collect(),
            request_error,
        }
    }
}

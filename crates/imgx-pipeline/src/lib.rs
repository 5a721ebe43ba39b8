//! Batch orchestration for image transforms.
//!
//! This crate provides:
//! - The batch item collection with enqueue, options and reset
//! - Concurrency-bounded uploads with progress
//! - Single-request batch dispatch
//! - Per-job polling with bounded retries and cancellation of stale queries
//! - Result aggregation and ZIP export

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod export;
pub mod logging;
pub mod measure;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod upload;

pub use batch::Batch;
pub use config::PipelineConfig;
pub use dispatcher::{BatchDispatcher, DispatchOutcome, DispatchResult, DISPATCH_FAILURE_MESSAGE};
pub use error::{PipelineError, PipelineResult};
pub use events::{BatchEvent, EventSink};
pub use export::{ExportArchive, ExportSummary, ResultExporter};
pub use logging::{init_tracing, JobLogger};
pub use orchestrator::BatchOrchestrator;
pub use poller::{JobPoller, PollOutcome, PollResolution, PollSession, RetryBudget};
pub use registry::JobRegistry;
pub use upload::UploadStage;

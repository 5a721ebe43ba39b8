//! Client for the external image processing service.
//!
//! The service accepts a batch of images in one multipart request and
//! exposes a per-job status endpoint. This crate provides the
//! `ProcessingBackend` seam and its reqwest implementation.

pub mod backend;
pub mod client;
pub mod error;
pub mod types;

pub use backend::ProcessingBackend;
pub use client::{ProcessorClient, ProcessorConfig};
pub use error::{ProcessorError, ProcessorResult};
pub use types::{DispatchEntry, DispatchReply, DispatchResponse, JobMetadata, StatusResponse};

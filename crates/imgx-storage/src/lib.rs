//! Upload credentials and object storage transfer.
//!
//! This crate provides:
//! - The `UploadTargetIssuer` seam with an HTTP issuer client and an
//!   R2 presigning issuer
//! - The `ObjectUploader` seam with a reqwest uploader that reports
//!   monotonic progress

pub mod client;
pub mod error;
pub mod issuer;
pub mod uploader;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use issuer::{acquire_fresh_target, IssuerClient, IssuerConfig, UploadTargetIssuer};
pub use uploader::{ObjectUploader, StorageUploader, UploadProgress};

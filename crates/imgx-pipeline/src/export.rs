//! Result export: a JSON summary of the run and a ZIP archive of the
//! processed images.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use imgx_models::{ItemResult, ItemStatus, ResultRef};

use crate::batch::Batch;
use crate::error::{PipelineError, PipelineResult};

/// Concurrent result downloads while building an archive.
const MAX_CONCURRENT_FETCHES: usize = 4;

/// Counts plus the ordered per-item results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemResult>,
}

impl ExportSummary {
    pub fn from_results(results: Vec<ItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::export(e.to_string()))
    }
}

/// A built archive and what went into it.
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Entry names, in enqueue order
    pub entries: Vec<String>,
    /// Original names of results that could not be fetched
    pub skipped: Vec<String>,
}

/// Downloads processed results and packs them into a ZIP archive.
#[derive(Clone)]
pub struct ResultExporter {
    http: Client,
}

impl ResultExporter {
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config_error(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// Archive every completed item. Results that fail to download are
    /// skipped and listed; an archive with nothing in it is an error.
    pub async fn archive(&self, batch: &Batch) -> PipelineResult<ExportArchive> {
        let completed: Vec<(String, ResultRef)> = batch
            .items()
            .iter()
            .filter(|item| item.status() == ItemStatus::Completed)
            .filter_map(|item| {
                item.processed_result_ref()
                    .map(|r| (item.original_file_name().to_string(), r.clone()))
            })
            .collect();

        if completed.is_empty() {
            return Err(PipelineError::export("no processed results to export"));
        }

        let fetched: Vec<(String, ResultRef, PipelineResult<Bytes>)> = stream::iter(completed)
            .map(|(name, result)| async move {
                let bytes = self.fetch(&result).await;
                (name, result, bytes)
            })
            .buffered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        let mut used = HashSet::new();
        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for (name, result, bytes) in fetched {
            match bytes {
                Ok(bytes) => {
                    let entry = unique_entry_name(&processed_name(&name, &result), &mut used);
                    files.push((entry, bytes));
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping result that could not be fetched");
                    skipped.push(name);
                }
            }
        }

        if files.is_empty() {
            return Err(PipelineError::export("none of the processed results could be fetched"));
        }

        let entries: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
        let bytes = tokio::task::spawn_blocking(move || build_zip(&files))
            .await
            .map_err(|e| PipelineError::export(format!("archive task failed: {}", e)))??;

        info!("Built export archive with {} entries ({} skipped)", entries.len(), skipped.len());
        Ok(ExportArchive {
            file_name: archive_file_name(Utc::now()),
            bytes,
            entries,
            skipped,
        })
    }

    async fn fetch(&self, result: &ResultRef) -> PipelineResult<Bytes> {
        let url = Url::parse(result.as_str())
            .map_err(|e| PipelineError::export(format!("invalid result location {}: {}", result, e)))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::export(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::export(format!(
                "result download returned {}",
                response.status()
            )));
        }

        response.bytes().await.map_err(|e| PipelineError::export(e.to_string()))
    }
}

fn build_zip(files: &[(String, Bytes)]) -> PipelineResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }
    Ok(cursor.into_inner())
}

/// Archive file name for an export made at `now`.
pub fn archive_file_name(now: DateTime<Utc>) -> String {
    format!("imgx-results-{}.zip", now.format("%Y-%m-%d"))
}

/// Entry name for a processed result: the original stem with the result's
/// extension, falling back to the original extension.
pub fn processed_name(original: &str, result: &ResultRef) -> String {
    let (stem, original_ext) = match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (original, None),
    };

    let result_ext = Url::parse(result.as_str()).ok().and_then(|url| {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|last| last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
    });

    match result_ext.as_deref().or(original_ext) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

fn unique_entry_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (name, String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}{}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

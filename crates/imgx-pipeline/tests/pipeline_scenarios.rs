//! End-to-end batch runs against in-memory collaborators.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use imgx_models::{
    BatchStage, ItemStatus, JobId, JobState, ProcessingMethod, ProcessingOptions, ResultRef, SourceFile,
    UpscaleFactor, UploadTarget,
};
use imgx_pipeline::{Batch, BatchEvent, BatchOrchestrator, EventSink, JobRegistry, PipelineConfig};
use imgx_processor::{DispatchEntry, DispatchReply, ProcessingBackend, ProcessorError, ProcessorResult};
use imgx_storage::{ObjectUploader, StorageError, StorageResult, UploadProgress, UploadTargetIssuer};

struct FakeIssuer {
    misconfigured: bool,
}

#[async_trait]
impl UploadTargetIssuer for FakeIssuer {
    async fn acquire_upload_target(&self, file_name: &str, _size_bytes: u64) -> StorageResult<UploadTarget> {
        if self.misconfigured {
            return Err(StorageError::config_error("R2_BUCKET_NAME not set"));
        }
        Ok(UploadTarget::new(
            "https://bucket.test/put",
            BTreeMap::new(),
            format!("uploads/test/{}", file_name),
            60,
        ))
    }
}

#[derive(Default)]
struct FakeUploader {
    /// Remaining failures per file name
    failures: Mutex<HashMap<String, usize>>,
    uploads: Mutex<Vec<String>>,
}

impl FakeUploader {
    fn failing(name: &str, times: usize) -> Self {
        let uploader = Self::default();
        uploader.failures.lock().unwrap().insert(name.to_string(), times);
        uploader
    }

    fn uploads_of(&self, name: &str) -> usize {
        self.uploads.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl ObjectUploader for FakeUploader {
    async fn upload(&self, _target: &UploadTarget, file: &SourceFile, progress: &UploadProgress) -> StorageResult<()> {
        self.uploads.lock().unwrap().push(file.name.clone());
        progress.report(30);
        progress.report(60);

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&file.name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        let result = if fail {
            Err(StorageError::upload_failed("storage returned 403 Forbidden"))
        } else {
            progress.report(100);
            Ok(())
        };
        progress.close();
        result
    }
}

#[derive(Default)]
struct FakeBackend {
    rejected: HashSet<String>,
    fail_request: bool,
    /// Scripted status replies per file name; completes once exhausted
    statuses: Mutex<HashMap<String, VecDeque<JobState>>>,
    jobs: Mutex<HashMap<JobId, String>>,
    queries: AtomicUsize,
}

impl FakeBackend {
    fn rejecting(names: &[&str]) -> Self {
        Self {
            rejected: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn with_statuses(self, name: &str, states: Vec<JobState>) -> Self {
        self.statuses.lock().unwrap().insert(name.to_string(), states.into());
        self
    }
}

fn result_url(name: &str) -> String {
    format!("https://cdn.test/processed/{}", name)
}

#[async_trait]
impl ProcessingBackend for FakeBackend {
    async fn dispatch(&self, entries: &[DispatchEntry]) -> ProcessorResult<Vec<DispatchReply>> {
        if self.fail_request {
            return Err(ProcessorError::from_http_status(500, "internal error"));
        }

        let mut jobs = self.jobs.lock().unwrap();
        Ok(entries
            .iter()
            .map(|entry| {
                jobs.insert(entry.job_id.clone(), entry.original_file_name.clone());
                let rejected = self.rejected.contains(&entry.original_file_name);
                DispatchReply {
                    job_id: entry.job_id.clone(),
                    code: if rejected { 4 } else { 0 },
                    message: rejected.then(|| "Unsupported image".to_string()),
                    result_url: None,
                }
            })
            .collect())
    }

    async fn query_status(&self, job_id: &JobId, _cancel: &CancellationToken) -> ProcessorResult<JobState> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let name = self
            .jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ProcessorError::RequestFailed(format!("unknown job {}", job_id)))?;

        let scripted = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(|states| states.pop_front());
        Ok(scripted.unwrap_or_else(|| JobState::Completed(Some(ResultRef::new(result_url(&name))))))
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        poll_interval: Duration::from_millis(4000),
        ..Default::default()
    }
}

fn orchestrator(issuer: FakeIssuer, uploader: Arc<FakeUploader>, backend: Arc<FakeBackend>) -> BatchOrchestrator {
    BatchOrchestrator::new(Arc::new(issuer), uploader, backend, JobRegistry::new(), config())
}

fn healthy() -> FakeIssuer {
    FakeIssuer { misconfigured: false }
}

fn batch_of(names: &[&str]) -> Batch {
    let mut batch = Batch::new();
    for name in names {
        batch
            .enqueue_with(
                SourceFile::new(*name, "image/jpeg", vec![9u8; 32]),
                ProcessingOptions::Upscale {
                    factor: UpscaleFactor::X2,
                },
            )
            .unwrap();
    }
    batch
}

fn successes(results: &[imgx_models::ItemResult]) -> Vec<bool> {
    results.iter().map(|r| r.success).collect()
}

#[tokio::test(start_paused = true)]
async fn middle_item_rejected_at_dispatch() {
    let backend = Arc::new(FakeBackend::rejecting(&["b.jpg"]));
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), backend);
    let mut batch = batch_of(&["a.jpg", "b.jpg", "c.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![true, false, true]);
    assert_eq!(results[1].message, "Unsupported image");
    assert_eq!(results[0].result_ref, Some(ResultRef::new(result_url("a.jpg"))));
    assert_eq!(batch.stage(), BatchStage::Completed);
    assert_eq!(batch.progress().percentage, 100);
}

#[tokio::test(start_paused = true)]
async fn dispatch_server_error_fails_every_item() {
    let backend = Arc::new(FakeBackend {
        fail_request: true,
        ..Default::default()
    });
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), backend.clone());
    let mut batch = batch_of(&["a.jpg", "b.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![false, false]);
    assert!(results.iter().all(|r| r.message == "Processing failed"));
    assert_eq!(backend.queries.load(Ordering::SeqCst), 0);
    assert_eq!(batch.stage(), BatchStage::Error);
    assert_eq!(batch.progress().completed_count, 2);
}

#[tokio::test(start_paused = true)]
async fn upload_failure_does_not_stop_the_batch() {
    let uploader = Arc::new(FakeUploader::failing("b.jpg", 1));
    let orchestrator = orchestrator(healthy(), uploader, Arc::new(FakeBackend::default()));
    let mut batch = batch_of(&["a.jpg", "b.jpg", "c.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![true, false, true]);
    assert!(results[1].message.contains("403"));
    assert_eq!(batch.item(1).unwrap().status(), ItemStatus::Failed);
    // The key is recorded when the credential is issued, even if the transfer fails.
    assert_eq!(batch.item(1).unwrap().source_key(), "uploads/test/b.jpg");
    assert_eq!(batch.item(0).unwrap().source_key(), "uploads/test/a.jpg");
}

#[tokio::test(start_paused = true)]
async fn results_keep_enqueue_order_when_jobs_finish_out_of_order() {
    let backend = FakeBackend::default()
        .with_statuses("a.jpg", vec![JobState::Pending, JobState::Pending, JobState::Pending])
        .with_statuses("b.jpg", vec![JobState::Pending]);
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(backend));
    let mut batch = batch_of(&["a.jpg", "b.jpg", "c.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    let names: Vec<_> = results.iter().map(|r| r.original_file_name.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    assert_eq!(successes(&results), vec![true, true, true]);
}

#[tokio::test(start_paused = true)]
async fn slow_job_times_out_alone() {
    let backend = FakeBackend::default().with_statuses("slow.jpg", vec![JobState::Pending; 20]);
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(backend));
    let mut batch = batch_of(&["fast.jpg", "slow.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![true, false]);
    assert!(results[1].message.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn explicit_job_failure_is_reported() {
    let backend = FakeBackend::default().with_statuses("a.jpg", vec![JobState::Failed("NSFW content".to_string())]);
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(backend));
    let mut batch = batch_of(&["a.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert!(!results[0].success);
    assert_eq!(results[0].message, "NSFW content");
}

#[tokio::test(start_paused = true)]
async fn misconfigured_storage_aborts_the_batch() {
    let orchestrator = orchestrator(
        FakeIssuer { misconfigured: true },
        Arc::new(FakeUploader::default()),
        Arc::new(FakeBackend::default()),
    );
    let mut batch = batch_of(&["a.jpg", "b.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![false, false]);
    assert!(results.iter().all(|r| r.message.contains("R2_BUCKET_NAME not set")));
    assert_eq!(batch.stage(), BatchStage::Error);
    assert_eq!(orchestrator.registry().active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn item_without_options_fails_without_dispatch() {
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(FakeBackend::default()));
    let mut batch = batch_of(&["a.jpg"]);
    batch
        .enqueue(SourceFile::new("bare.jpg", "image/jpeg", vec![1u8; 8]))
        .unwrap();

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![true, false]);
    assert!(results[1].message.contains("No processing method selected"));
}

#[tokio::test(start_paused = true)]
async fn requeued_item_runs_again_alone() {
    let uploader = Arc::new(FakeUploader::failing("b.jpg", 1));
    let orchestrator = orchestrator(healthy(), uploader.clone(), Arc::new(FakeBackend::default()));
    let mut batch = batch_of(&["a.jpg", "b.jpg"]);

    let first = orchestrator.run(&mut batch).await;
    assert_eq!(successes(&first), vec![true, false]);

    batch.requeue_failed(1).unwrap();
    batch.select_method(1, ProcessingMethod::Square).unwrap();
    let second = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&second), vec![true, true]);
    assert_eq!(uploader.uploads_of("a.jpg"), 1);
    assert_eq!(uploader.uploads_of("b.jpg"), 2);
}

#[tokio::test(start_paused = true)]
async fn events_track_progress_to_completion() {
    let (sink, mut rx) = EventSink::channel();
    let orchestrator =
        orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(FakeBackend::default())).with_events(sink);
    let mut batch = batch_of(&["a.jpg", "b.jpg", "c.jpg"]);

    orchestrator.run(&mut batch).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let percentages: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::Progress(p) => Some(p.percentage),
            _ => None,
        })
        .collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percentages.last(), Some(&100));

    let uploads: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::UploadProgress { index: 0, percent } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec![30, 60, 100]);

    assert!(matches!(events.last(), Some(BatchEvent::Finished(results)) if results.len() == 3));
    assert_eq!(batch.progress(), batch.progress());
}

#[tokio::test(start_paused = true)]
async fn dropped_event_receiver_does_not_abort() {
    let (sink, rx) = EventSink::channel();
    drop(rx);
    let orchestrator =
        orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(FakeBackend::default())).with_events(sink);
    let mut batch = batch_of(&["a.jpg", "b.jpg"]);

    let results = orchestrator.run(&mut batch).await;

    assert_eq!(successes(&results), vec![true, true]);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_completes_immediately() {
    let orchestrator = orchestrator(healthy(), Arc::new(FakeUploader::default()), Arc::new(FakeBackend::default()));
    let mut batch = Batch::new();

    let results = orchestrator.run(&mut batch).await;

    assert!(results.is_empty());
    assert_eq!(batch.progress().percentage, 0);
    assert_eq!(batch.stage(), BatchStage::Completed);
}

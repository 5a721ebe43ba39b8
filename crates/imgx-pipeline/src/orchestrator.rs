//! Batch orchestrator.
//!
//! Runs the queued items of a batch through upload, dispatch and polling,
//! and reports one result per item in enqueue order. Per-item failures
//! never stop the batch. Errors that are not tied to a single item abort
//! the run: every unfinished item fails with the error's message and the
//! batch stage becomes `Error`.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};

use imgx_models::{BatchStage, ItemResult, ItemStatus, JobHandle, QueuedItem};
use imgx_processor::{ProcessingBackend, ProcessorClient};
use imgx_storage::{
    IssuerClient, ObjectUploader, R2Client, StorageError, StorageUploader, UploadProgress, UploadTargetIssuer,
};

use crate::batch::Batch;
use crate::config::PipelineConfig;
use crate::dispatcher::{BatchDispatcher, DispatchResult};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{BatchEvent, EventSink};
use crate::metrics;
use crate::poller::{JobPoller, PollOutcome};
use crate::registry::JobRegistry;
use crate::upload::UploadStage;

/// Messages from in-flight uploads to the batch owner.
enum UploadSignal {
    KeyIssued(String),
    Progress(u8),
}

pub struct BatchOrchestrator {
    uploads: UploadStage,
    dispatcher: BatchDispatcher,
    poller: JobPoller,
    config: PipelineConfig,
    events: EventSink,
}

impl BatchOrchestrator {
    pub fn new(
        issuer: Arc<dyn UploadTargetIssuer>,
        uploader: Arc<dyn ObjectUploader>,
        backend: Arc<dyn ProcessingBackend>,
        registry: JobRegistry,
        config: PipelineConfig,
    ) -> Self {
        Self {
            uploads: UploadStage::new(issuer, uploader),
            dispatcher: BatchDispatcher::new(backend.clone()),
            poller: JobPoller::new(backend, registry, &config),
            config,
            events: EventSink::disabled(),
        }
    }

    /// Build from environment variables. Uploads are signed in-process
    /// when `R2_ENDPOINT_URL` is set, otherwise by the remote issuer.
    pub async fn from_env() -> PipelineResult<Self> {
        let config = PipelineConfig::load();

        let issuer: Arc<dyn UploadTargetIssuer> = if std::env::var("R2_ENDPOINT_URL").is_ok() {
            Arc::new(R2Client::from_env().await?)
        } else {
            Arc::new(IssuerClient::from_env()?)
        };
        let uploader = Arc::new(StorageUploader::new(config.upload_timeout)?);
        let backend = Arc::new(ProcessorClient::from_env()?);

        Ok(Self::new(issuer, uploader, backend, JobRegistry::new(), config))
    }

    /// Send batch events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        self.poller.registry()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every queued item of `batch`. Items already completed or failed
    /// are left alone and still reported.
    pub async fn run(&self, batch: &mut Batch) -> Vec<ItemResult> {
        let span = tracing::info_span!("batch", items = batch.len());
        async {
            info!("Starting batch run");

            match self.execute(batch).await {
                Ok(()) => self.set_stage(batch, BatchStage::Completed),
                Err(e) => {
                    error!(error = %e, "Batch run aborted");
                    let detail = e.to_string();
                    for index in batch.abort_unfinished(&detail) {
                        self.item_resolved(batch, index, "abort");
                    }
                    self.poller.registry().cancel_all().await;
                    self.set_stage(batch, BatchStage::Error);
                }
            }

            let results = batch.results();
            let succeeded = results.iter().filter(|r| r.success).count();
            info!("Batch finished: {}/{} succeeded", succeeded, results.len());
            self.events.emit(BatchEvent::Finished(results.clone()));
            results
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, batch: &mut Batch) -> PipelineResult<()> {
        let queued = batch.queued_indices();
        if queued.is_empty() {
            return Ok(());
        }

        batch.measure_dimensions().await;

        let mut runnable = Vec::with_capacity(queued.len());
        for index in queued {
            let item = batch.item_mut(index)?;
            if item.processing_options().is_some() {
                runnable.push(index);
                continue;
            }
            let detail = PipelineError::MissingOptions(item.original_file_name().to_string()).to_string();
            item.abort(detail);
            self.item_resolved(batch, index, "validate");
        }

        self.set_stage(batch, BatchStage::Uploading);
        let uploaded = self.upload_all(batch, &runnable).await?;
        if uploaded.is_empty() {
            return Ok(());
        }

        self.set_stage(batch, BatchStage::Dispatching);
        let handles = self.dispatch_all(batch, &uploaded).await?;
        if handles.is_empty() {
            return Ok(());
        }

        self.set_stage(batch, BatchStage::Polling);
        self.poll_all(batch, handles).await
    }

    /// Upload concurrently, applying progress as it arrives. Returns the
    /// indices that uploaded successfully, in enqueue order.
    async fn upload_all(&self, batch: &mut Batch, indices: &[usize]) -> PipelineResult<Vec<usize>> {
        let mut files = Vec::with_capacity(indices.len());
        for &index in indices {
            let item = batch.item_mut(index)?;
            item.begin_upload()?;
            files.push((index, item.source_file()));
            self.emit_status(batch, index);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, UploadSignal)>();
        let stage = &self.uploads;
        let mut uploads = stream::iter(files.into_iter().map(|(index, file)| {
            let tx = tx.clone();
            async move {
                let progress_tx = tx.clone();
                let progress = UploadProgress::new(move |percent| {
                    let _ = progress_tx.send((index, UploadSignal::Progress(percent)));
                });
                let target = match stage.acquire(&file, &progress).await {
                    Ok(target) => target,
                    Err(e) => return (index, Err(e)),
                };
                let _ = tx.send((index, UploadSignal::KeyIssued(target.destination_key.clone())));
                (index, stage.transfer(&target, &file, &progress).await)
            }
        }))
        .buffer_unordered(self.config.upload_concurrency());

        // The receiver is polled first, so every signal is applied before
        // the upload stream is seen to end.
        let mut uploaded = Vec::with_capacity(indices.len());
        loop {
            tokio::select! {
                biased;
                Some((index, signal)) = rx.recv() => match signal {
                    UploadSignal::KeyIssued(key) => batch.item_mut(index)?.assign_source_key(key),
                    UploadSignal::Progress(percent) => {
                        if batch.item_mut(index)?.record_upload_progress(percent) {
                            self.events.emit(BatchEvent::UploadProgress { index, percent });
                        }
                    }
                },
                next = uploads.next() => match next {
                    Some((index, Ok(()))) => uploaded.push(index),
                    // Misconfiguration affects every item, not just this one.
                    Some((_, Err(e @ StorageError::ConfigError(_)))) => return Err(e.into()),
                    Some((index, Err(e))) => {
                        batch.item_mut(index)?.fail(e.to_string())?;
                        self.item_resolved(batch, index, "upload");
                    }
                    None => break,
                },
            }
        }

        uploaded.sort_unstable();
        Ok(uploaded)
    }

    /// Dispatch uploaded items in one request. Returns handles for the
    /// accepted items; rejected items are failed here.
    async fn dispatch_all(&self, batch: &mut Batch, indices: &[usize]) -> PipelineResult<Vec<JobHandle>> {
        for &index in indices {
            batch.item_mut(index)?.mark_dispatched()?;
            self.emit_status(batch, index);
        }

        let outcome = {
            let items = indices
                .iter()
                .map(|&index| batch.item(index).map(|item| (index, item)).ok_or(PipelineError::ItemNotFound(index)))
                .collect::<PipelineResult<Vec<(usize, &QueuedItem)>>>()?;
            self.dispatcher.dispatch(&items).await
        };

        if outcome.results.len() != indices.len() {
            return Err(PipelineError::dispatch_failed(format!(
                "expected {} dispatch results, got {}",
                indices.len(),
                outcome.results.len()
            )));
        }

        let mut handles = Vec::with_capacity(indices.len());
        for (&index, result) in indices.iter().zip(outcome.results) {
            match result {
                DispatchResult::Accepted(handle) => {
                    batch.item_mut(index)?.mark_polling()?;
                    self.emit_status(batch, index);
                    handles.push(handle);
                }
                DispatchResult::Rejected { error } => {
                    batch.item_mut(index)?.fail(error)?;
                    self.item_resolved(batch, index, "dispatch");
                }
            }
        }

        // Items already carry the per-item message; the batch still errors.
        match outcome.request_error {
            Some(e) => Err(PipelineError::dispatch_failed(e)),
            None => Ok(handles),
        }
    }

    /// Poll accepted jobs concurrently, resolving items as jobs finish.
    async fn poll_all(&self, batch: &mut Batch, handles: Vec<JobHandle>) -> PipelineResult<()> {
        let poller = &self.poller;
        let mut polls = stream::iter(handles.into_iter().map(|handle| async move {
            let index = handle.item_index;
            (index, poller.poll_until_resolved(handle).await)
        }))
        .buffer_unordered(self.config.poll_concurrency());

        while let Some((index, resolution)) = polls.next().await {
            debug!(
                job_id = %resolution.job_id,
                queries = resolution.queries_issued,
                attempts_left = resolution.budget.attempts_remaining(),
                "Job resolved"
            );

            let item = batch.item_mut(index)?;
            match resolution.outcome {
                PollOutcome::Completed(result) => item.complete(result)?,
                PollOutcome::Failed(message) => item.fail(message)?,
            }
            self.item_resolved(batch, index, "poll");
        }

        Ok(())
    }

    fn set_stage(&self, batch: &mut Batch, stage: BatchStage) {
        batch.set_stage(stage);
        debug!("Batch stage: {}", stage.as_str());
        self.events.emit(BatchEvent::Progress(batch.progress()));
    }

    fn emit_status(&self, batch: &Batch, index: usize) {
        if let Some(item) = batch.item(index) {
            self.events.emit(BatchEvent::ItemStatus {
                index,
                file: item.original_file_name().to_string(),
                status: item.status(),
            });
        }
    }

    /// An item reached a terminal state: report it and the new progress.
    fn item_resolved(&self, batch: &Batch, index: usize, stage: &str) {
        if let Some(item) = batch.item(index) {
            metrics::record_item_outcome(stage, item.status() == ItemStatus::Completed);
        }
        self.emit_status(batch, index);
        self.events.emit(BatchEvent::Progress(batch.progress()));
    }
}

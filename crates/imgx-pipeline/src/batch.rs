//! The batch: an ordered collection of queued items.
//!
//! The orchestrator borrows the batch mutably for the length of a run, so
//! item state has a single writer. Callers enqueue, choose options and
//! read results between runs.

use futures::future::join_all;
use tracing::{debug, info};

use imgx_models::{
    BatchProgress, BatchStage, ItemResult, ItemStatus, ProcessingMethod, ProcessingOptions,
    QueuedItem, SourceFile,
};

use crate::error::{PipelineError, PipelineResult};
use crate::measure;

#[derive(Debug, Clone, Default)]
pub struct Batch {
    items: Vec<QueuedItem>,
    stage: BatchStage,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file and return its index.
    ///
    /// A file with the same name and size as an existing item is a
    /// duplicate; the same name with a different size is a conflict.
    pub fn enqueue(&mut self, file: SourceFile) -> PipelineResult<usize> {
        if let Some(existing) = self
            .items
            .iter()
            .find(|item| item.original_file_name() == file.name)
        {
            return Err(if existing.size_bytes() == file.size_bytes() {
                PipelineError::DuplicateItem(file.name)
            } else {
                PipelineError::NameConflict(file.name)
            });
        }

        debug!("Enqueued {} ({} bytes)", file.name, file.size_bytes());
        self.items.push(QueuedItem::new(file));
        Ok(self.items.len() - 1)
    }

    /// Enqueue with a method selected up front.
    pub fn enqueue_with(&mut self, file: SourceFile, options: ProcessingOptions) -> PipelineResult<usize> {
        let index = self.enqueue(file)?;
        self.items[index].set_options(options)?;
        Ok(index)
    }

    pub fn set_options(&mut self, index: usize, options: ProcessingOptions) -> PipelineResult<()> {
        self.queued_item_mut(index)?.set_options(options)?;
        Ok(())
    }

    /// Select a method, discarding the parameters of the previous one.
    pub fn select_method(&mut self, index: usize, method: ProcessingMethod) -> PipelineResult<()> {
        self.queued_item_mut(index)?.select_method(method)?;
        Ok(())
    }

    /// Apply the same method to every queued item.
    pub fn select_method_for_all(&mut self, method: ProcessingMethod) -> PipelineResult<()> {
        for item in self.items.iter_mut().filter(|i| i.status() == ItemStatus::Queued) {
            item.select_method(method)?;
        }
        Ok(())
    }

    /// Remove an item that is not in flight.
    pub fn remove(&mut self, index: usize) -> PipelineResult<QueuedItem> {
        let item = self.items.get(index).ok_or(PipelineError::ItemNotFound(index))?;
        if item.status().is_in_flight() {
            return Err(PipelineError::ItemBusy(item.original_file_name().to_string()));
        }
        Ok(self.items.remove(index))
    }

    /// Put a failed item back in the queue as a fresh item.
    pub fn requeue_failed(&mut self, index: usize) -> PipelineResult<()> {
        let item = self.items.get_mut(index).ok_or(PipelineError::ItemNotFound(index))?;
        item.reset_for_retry()?;
        info!("Requeued {}", item.original_file_name());
        Ok(())
    }

    /// Requeue every failed item. Returns how many were requeued.
    pub fn requeue_all_failed(&mut self) -> PipelineResult<usize> {
        let mut requeued = 0;
        for item in self.items.iter_mut().filter(|i| i.status() == ItemStatus::Failed) {
            item.reset_for_retry()?;
            requeued += 1;
        }
        if requeued > 0 {
            info!("Requeued {} failed items", requeued);
        }
        Ok(requeued)
    }

    /// Discard every item and return to idle.
    pub fn reset(&mut self) {
        self.items.clear();
        self.stage = BatchStage::Idle;
    }

    /// Measure dimensions for items that have none yet. Undecodable files
    /// keep `None`.
    pub async fn measure_dimensions(&mut self) {
        let pending: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.dimensions().is_none())
            .map(|(index, _)| index)
            .collect();

        let measured = join_all(
            pending
                .iter()
                .map(|&index| measure::measure(self.items[index].bytes().clone())),
        )
        .await;

        for (index, dimensions) in pending.into_iter().zip(measured) {
            if let Some(dimensions) = dimensions {
                // Only unmeasured items were selected, so this cannot collide.
                let _ = self.items[index].set_dimensions(dimensions);
            }
        }
    }

    pub fn items(&self) -> &[QueuedItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&QueuedItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stage(&self) -> BatchStage {
        self.stage
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress::compute(self.stage, &self.items)
    }

    /// One result per item, in enqueue order.
    pub fn results(&self) -> Vec<ItemResult> {
        self.items.iter().map(ItemResult::from_item).collect()
    }

    /// Indices of items waiting to run.
    pub fn queued_indices(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status() == ItemStatus::Queued)
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn set_stage(&mut self, stage: BatchStage) {
        self.stage = stage;
    }

    pub(crate) fn item_mut(&mut self, index: usize) -> PipelineResult<&mut QueuedItem> {
        self.items.get_mut(index).ok_or(PipelineError::ItemNotFound(index))
    }

    /// Fail every item that has not reached a terminal state.
    pub(crate) fn abort_unfinished(&mut self, detail: &str) -> Vec<usize> {
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(|(index, item)| item.abort(detail).then_some(index))
            .collect()
    }

    fn queued_item_mut(&mut self, index: usize) -> PipelineResult<&mut QueuedItem> {
        let item = self.item_mut(index)?;
        if item.status() != ItemStatus::Queued {
            return Err(PipelineError::ItemBusy(item.original_file_name().to_string()));
        }
        Ok(item)
    }
}

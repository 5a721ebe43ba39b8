//! Batch progress projection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::item::QueuedItem;

/// Stage of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    #[default]
    Idle,
    Uploading,
    Dispatching,
    Polling,
    Completed,
    Error,
}

impl BatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::Idle => "idle",
            BatchStage::Uploading => "uploading",
            BatchStage::Dispatching => "dispatching",
            BatchStage::Polling => "polling",
            BatchStage::Completed => "completed",
            BatchStage::Error => "error",
        }
    }
}

/// Aggregate progress. A pure projection of the item collection, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub stage: BatchStage,
    /// Items in a terminal state (completed or failed)
    pub completed_count: usize,
    pub total_count: usize,
    /// round(100 * completed / total); 0 for an empty batch
    pub percentage: u8,
}

impl BatchProgress {
    pub fn compute(stage: BatchStage, items: &[QueuedItem]) -> Self {
        let total_count = items.len();
        let completed_count = items.iter().filter(|i| i.status().is_terminal()).count();
        let percentage = if total_count == 0 {
            0
        } else {
            (100.0 * completed_count as f64 / total_count as f64).round() as u8
        };

        Self {
            stage,
            completed_count,
            total_count,
            percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::SourceFile;
    use crate::result::ResultRef;

    fn items(n: usize) -> Vec<QueuedItem> {
        (0..n)
            .map(|i| QueuedItem::new(SourceFile::new(format!("{}.png", i), "image/png", vec![0u8; 4])))
            .collect()
    }

    fn finish(item: &mut QueuedItem) {
        item.begin_upload().unwrap();
        item.mark_dispatched().unwrap();
        item.mark_polling().unwrap();
        item.complete(ResultRef::new("r")).unwrap();
    }

    #[test]
    fn test_empty_batch() {
        let progress = BatchProgress::compute(BatchStage::Idle, &[]);
        assert_eq!(progress.percentage, 0);
        assert_eq!(progress.total_count, 0);
    }

    #[test]
    fn test_percentage_rounds() {
        let mut items = items(3);
        finish(&mut items[0]);
        items[1].begin_upload().unwrap();
        items[1].fail("upload failed").unwrap();

        let progress = BatchProgress::compute(BatchStage::Polling, &items);
        assert_eq!(progress.completed_count, 2);
        assert_eq!(progress.total_count, 3);
        assert_eq!(progress.percentage, 67);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let mut items = items(4);
        finish(&mut items[2]);

        let first = BatchProgress::compute(BatchStage::Polling, &items);
        let second = BatchProgress::compute(BatchStage::Polling, &items);
        assert_eq!(first, second);
        assert_eq!(first.percentage, 25);
    }
}

//! Batch events for UI consumers.

use tokio::sync::mpsc;

use imgx_models::{BatchProgress, ItemResult, ItemStatus};

/// Something observable happened during a batch run.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// An item moved to a new status
    ItemStatus {
        index: usize,
        file: String,
        status: ItemStatus,
    },
    /// Upload progress for one item, 0 to 100
    UploadProgress { index: usize, percent: u8 },
    /// Aggregate progress was recomputed
    Progress(BatchProgress),
    /// The run finished with these results, in enqueue order
    Finished(Vec<ItemResult>),
}

/// Sending half of the event channel.
///
/// Emission never blocks and never fails: once the receiver is dropped,
/// events are discarded and the run carries on.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl EventSink {
    /// Create a connected sink and its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgx_models::BatchStage;

    #[test]
    fn test_events_are_delivered_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(BatchEvent::UploadProgress { index: 0, percent: 40 });
        sink.emit(BatchEvent::Progress(BatchProgress::compute(BatchStage::Uploading, &[])));

        assert_eq!(
            rx.try_recv().unwrap(),
            BatchEvent::UploadProgress { index: 0, percent: 40 }
        );
        assert!(matches!(rx.try_recv().unwrap(), BatchEvent::Progress(_)));
    }

    #[test]
    fn test_dropped_receiver_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);

        assert!(!sink.is_connected());
        sink.emit(BatchEvent::Finished(Vec::new()));
    }
}

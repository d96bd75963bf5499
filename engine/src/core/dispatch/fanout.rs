//! Batch Fan-Out
//!
//! Duplicates every fired batch into two independent bounded queues, one per
//! sink task. A slow or failed consumer on one side does not block delivery
//! to the other once its queue has room.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::core::windowing::WindowedBatch;
use crate::core::{CoreError, CoreResult};

/// Receiving end of one fan-out queue
pub type BatchReceiver = mpsc::Receiver<Arc<WindowedBatch>>;

/// Sending half shared by the windower lanes
#[derive(Clone, Debug)]
pub struct BatchFanOut {
    notification_tx: mpsc::Sender<Arc<WindowedBatch>>,
    table_tx: mpsc::Sender<Arc<WindowedBatch>>,
}

impl BatchFanOut {
    /// Creates the fan-out and the (notification, table) receivers
    pub fn channel(capacity: usize) -> (Self, BatchReceiver, BatchReceiver) {
        let (notification_tx, notification_rx) = mpsc::channel(capacity.max(1));
        let (table_tx, table_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                notification_tx,
                table_tx,
            },
            notification_rx,
            table_rx,
        )
    }

    /// Sends one batch to both queues
    ///
    /// Fails only when both consumers are gone.
    pub async fn send(&self, batch: WindowedBatch) -> CoreResult<()> {
        let batch = Arc::new(batch);

        let notified = self.notification_tx.send(Arc::clone(&batch)).await.is_ok();
        if !notified {
            warn!(
                "Notification queue closed, batch {} not dispatched",
                batch.batch_id
            );
        }

        let tabled = self.table_tx.send(Arc::clone(&batch)).await.is_ok();
        if !tabled {
            warn!("Table queue closed, batch {} not written", batch.batch_id);
        }

        if notified || tabled {
            Ok(())
        } else {
            Err(CoreError::SinkUnavailable(
                "both batch consumers have stopped".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::windowing::WindowBounds;

    fn batch() -> WindowedBatch {
        WindowedBatch::new("cam-1", WindowBounds::assign(0, 1_000), Vec::new())
    }

    #[tokio::test]
    async fn test_both_consumers_see_the_same_batch() {
        let (fanout, mut notifications, mut tables) = BatchFanOut::channel(4);
        fanout.send(batch()).await.unwrap();

        let a = notifications.recv().await.unwrap();
        let b = tables.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_one_closed_consumer_does_not_stop_the_other() {
        let (fanout, notifications, mut tables) = BatchFanOut::channel(4);
        drop(notifications);

        fanout.send(batch()).await.unwrap();
        assert!(tables.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_both_closed_is_an_error() {
        let (fanout, notifications, tables) = BatchFanOut::channel(4);
        drop(notifications);
        drop(tables);
        assert!(fanout.send(batch()).await.is_err());
    }

    #[tokio::test]
    async fn test_queues_close_when_senders_drop() {
        let (fanout, mut notifications, mut tables) = BatchFanOut::channel(1);
        let clone = fanout.clone();
        drop(fanout);
        clone.send(batch()).await.unwrap();
        drop(clone);

        assert!(notifications.recv().await.is_some());
        assert!(notifications.recv().await.is_none());
        assert!(tables.recv().await.is_some());
        assert!(tables.recv().await.is_none());
    }
}

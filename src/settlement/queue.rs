use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::store::Intent;

/// Bound of the producer→worker handoff; the sole backpressure mechanism.
/// A slow chain fills the queue and throttles polling.
pub const WORK_QUEUE_CAPACITY: usize = 100;

/// Creates the bounded FIFO between the producer and the workers.
///
/// Dropping the sender (producer exit) drains into `None` on the consumer
/// side so workers can wind down.
pub fn bounded(capacity: usize) -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        WorkSender { tx },
        WorkReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

pub struct WorkSender {
    tx: mpsc::Sender<Intent>,
}

impl WorkSender {
    /// Enqueues an intent, waiting while the queue is full. Returns the
    /// intent back if every worker is gone.
    pub async fn offer(&self, intent: Intent) -> Result<(), Intent> {
        self.tx.send(intent).await.map_err(|rejected| rejected.0)
    }
}

/// Shared take-side of the queue; one clone per worker.
#[derive(Clone)]
pub struct WorkReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Intent>>>,
}

impl WorkReceiver {
    /// Blocks until an item is available; `None` once the producer is gone
    /// and the queue is drained.
    pub async fn take(&self) -> Option<Intent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn items_come_out_in_offer_order() {
        let (sender, receiver) = bounded(10);
        let first = Intent::new("0x01", "1", "0x", "21000");
        let second = Intent::new("0x02", "2", "0x", "21000");

        sender.offer(first.clone()).await.unwrap();
        sender.offer(second.clone()).await.unwrap();

        assert_eq!(receiver.take().await.unwrap().id, first.id);
        assert_eq!(receiver.take().await.unwrap().id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_the_offer_until_a_take() {
        let (sender, receiver) = bounded(1);
        sender
            .offer(Intent::new("0x01", "1", "0x", "21000"))
            .await
            .unwrap();

        let blocked = Intent::new("0x02", "2", "0x", "21000");
        let blocked_id = blocked.id;
        let offer = tokio::spawn(async move { sender.offer(blocked).await });

        // The second offer cannot complete while the queue is full.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!offer.is_finished());

        // Draining one slot unblocks it.
        let _ = receiver.take().await.unwrap();
        offer.await.unwrap().unwrap();
        assert_eq!(receiver.take().await.unwrap().id, blocked_id);
    }

    #[tokio::test]
    async fn take_ends_once_the_producer_is_gone() {
        let (sender, receiver) = bounded(1);
        sender
            .offer(Intent::new("0x01", "1", "0x", "21000"))
            .await
            .unwrap();
        drop(sender);

        assert!(receiver.take().await.is_some());
        assert!(receiver.take().await.is_none());
    }

    #[tokio::test]
    async fn offers_fail_once_all_receivers_are_gone() {
        let (sender, receiver) = bounded(1);
        drop(receiver);
        let intent = Intent::new("0x01", "1", "0x", "21000");
        let rejected = sender.offer(intent.clone()).await.unwrap_err();
        assert_eq!(rejected.id, intent.id);
    }
}

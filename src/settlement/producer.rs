// Intent producer - feeds the worker pool from the durable queue
//
// Poll cycle:
// 1. Fetch PENDING intents (oldest first)
// 2. Claim their IDs against the in-flight registry
// 3. Offer only newly claimed intents to the bounded work queue
// 4. Sleep for the poll interval
//
// The producer must never die: store failures and defects inside a cycle
// are logged and the loop resumes on the next tick.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::WorkSender;
use super::registry::InFlightRegistry;
use crate::store::{Intent, IntentStore};

pub struct Producer {
    store: Arc<dyn IntentStore>,
    queue: WorkSender,
    registry: Arc<InFlightRegistry>,
    poll_interval: Duration,
}

impl Producer {
    pub fn new(
        store: Arc<dyn IntentStore>,
        queue: WorkSender,
        registry: Arc<InFlightRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "intent producer started (polling every {:?})",
            self.poll_interval
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.cycle() => {}
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        info!("intent producer stopped");
    }

    async fn cycle(&self) {
        if AssertUnwindSafe(self.poll_once())
            .catch_unwind()
            .await
            .is_err()
        {
            error!("producer cycle panicked; resuming on next tick");
        }
    }

    pub(crate) async fn poll_once(&self) {
        let pending = match self.store.get_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "failed to poll pending intents");
                return;
            }
        };

        if pending.is_empty() {
            debug!("no pending intents");
            return;
        }

        let candidates: Vec<Uuid> = pending.iter().map(|intent| intent.id).collect();
        let claimed: HashSet<Uuid> = self.registry.claim(&candidates).await.into_iter().collect();
        if claimed.is_empty() {
            return;
        }
        info!("claimed {} new intents for settlement", claimed.len());

        let mut queue_open = true;
        for intent in pending
            .into_iter()
            .filter(|intent| claimed.contains(&intent.id))
        {
            let id = intent.id;
            if queue_open && self.offer(intent).await {
                continue;
            }
            queue_open = false;
            self.registry.release(&id).await;
        }
    }

    async fn offer(&self, intent: Intent) -> bool {
        let id = intent.id;
        if self.queue.offer(intent).await.is_err() {
            warn!(intent = %id, "work queue closed; releasing unqueued claims");
            return false;
        }
        true
    }
}

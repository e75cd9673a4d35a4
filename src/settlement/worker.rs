use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::processor::{ProcessOutcome, Processor};
use super::queue::WorkReceiver;
use super::registry::InFlightRegistry;
use crate::error::{SettlementError, SettlementResult};
use crate::store::{Intent, IntentStatus, IntentStore};

/// In-worker retry schedule: quick transients (a network blip, a nonce
/// conflict) resolve in hundreds of milliseconds; waiting for the next
/// poll cycle would waste that latency.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_EXTRA_ATTEMPTS: u32 = 2;

/// Settlement worker: takes intents from the queue, runs the processor
/// under the submission lock, and always clears the registry slot when an
/// attempt sequence finishes. Shutdown wakes the worker out of the
/// queue-take, the lock-wait and the retry backoff; pre-broadcast work is
/// abandoned, post-broadcast persistence completes.
pub struct Worker {
    id: usize,
    queue: WorkReceiver,
    registry: Arc<InFlightRegistry>,
    store: Arc<dyn IntentStore>,
    processor: Processor,
    submission_lock: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: WorkReceiver,
        registry: Arc<InFlightRegistry>,
        store: Arc<dyn IntentStore>,
        processor: Processor,
        submission_lock: Arc<Semaphore>,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            store,
            processor,
            submission_lock,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(worker = self.id, "settlement worker started");
        loop {
            let item = tokio::select! {
                _ = shutdown.recv() => break,
                item = self.queue.take() => item,
            };
            match item {
                Some(intent) => {
                    if !self.handle(intent, &mut shutdown).await {
                        break;
                    }
                }
                None => break,
            }
        }
        info!(worker = self.id, "settlement worker stopped");
    }

    /// One queue item, panic-isolated; the registry slot is released on
    /// every exit path. The terminal outcome was already persisted by the
    /// processor. Returns false once shutdown has been observed.
    async fn handle(&self, intent: Intent, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let intent_id = intent.id;
        let outcome = AssertUnwindSafe(self.settle_with_retries(intent, shutdown))
            .catch_unwind()
            .await;

        let keep_running = match outcome {
            Ok(Ok(ProcessOutcome::Settled(hash))) => {
                info!(worker = self.id, intent = %intent_id, hash = %hash, "intent settled");
                true
            }
            Ok(Ok(ProcessOutcome::Abandoned)) => {
                info!(
                    worker = self.id,
                    intent = %intent_id,
                    "attempt abandoned on shutdown, intent left for restart reconciliation"
                );
                false
            }
            Ok(Err(e)) => {
                warn!(worker = self.id, intent = %intent_id, error = %e, "intent did not settle");
                true
            }
            Err(_) => {
                error!(worker = self.id, intent = %intent_id, "worker defect while settling intent");
                true
            }
        };

        self.registry.release(&intent_id).await;
        keep_running
    }

    /// The in-worker retry schedule: exponential backoff (100 ms base,
    /// factor 2) for up to 2 additional attempts, transient errors only.
    /// The submission lock is dropped between attempts so other workers
    /// can interleave; the lock-wait and the backoff sleep both race the
    /// shutdown signal.
    pub(crate) async fn settle_with_retries(
        &self,
        intent: Intent,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SettlementResult<ProcessOutcome> {
        let mut current = intent;
        let mut bump_gas = false;
        let mut extra_attempts = 0u32;

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(
                        worker = self.id,
                        intent = %current.id,
                        "shutdown while waiting for the submission lock"
                    );
                    return Ok(ProcessOutcome::Abandoned);
                }
                permit = self.submission_lock.acquire() => {
                    permit.map_err(|e| SettlementError::Unknown {
                        cause: format!("submission lock closed: {e}"),
                    })?
                }
            };
            let result = self.processor.process(&current, bump_gas, shutdown).await;
            drop(permit);

            let err = match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            if !err.is_transient() || extra_attempts >= MAX_EXTRA_ATTEMPTS {
                return Err(err);
            }

            extra_attempts += 1;
            bump_gas = matches!(err, SettlementError::ReplacementFeeTooLow { .. });
            let delay = RETRY_BASE_DELAY * 2u32.pow(extra_attempts - 1);
            debug!(
                worker = self.id,
                intent = %current.id,
                attempt = extra_attempts,
                ?delay,
                "retrying transient failure in-worker"
            );
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(
                        worker = self.id,
                        intent = %current.id,
                        "shutdown during retry backoff"
                    );
                    return Ok(ProcessOutcome::Abandoned);
                }
                _ = sleep(delay) => {}
            }

            // The processor decides where the intent goes; only re-attempt
            // if it put the row back to PENDING (not dead-lettered).
            match self.store.get(current.id).await? {
                Some(fresh) if fresh.status == IntentStatus::Pending => current = fresh,
                _ => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::settlement::engine::EngineConfig;
    use crate::settlement::nonce::NonceCoordinator;
    use crate::settlement::queue;
    use crate::settlement::testing::{MockChain, MockSigner};
    use crate::shutdown::ShutdownController;
    use crate::store::MemoryIntentStore;

    const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

    struct Harness {
        worker: Worker,
        store: Arc<MemoryIntentStore>,
        chain: Arc<MockChain>,
        nonce: Arc<NonceCoordinator>,
    }

    fn harness(chain: MockChain) -> Harness {
        let store = Arc::new(MemoryIntentStore::new());
        let chain = Arc::new(chain);
        let nonce = Arc::new(NonceCoordinator::new());
        let processor = Processor::new(
            store.clone(),
            chain.clone() as Arc<dyn Chain>,
            Arc::new(MockSigner::new()),
            nonce.clone(),
            EngineConfig::default(),
        );
        let (_sender, receiver) = queue::bounded(10);
        let worker = Worker::new(
            0,
            receiver,
            Arc::new(InFlightRegistry::new()),
            store.clone(),
            processor,
            Arc::new(Semaphore::new(1)),
        );
        Harness {
            worker,
            store,
            chain,
            nonce,
        }
    }

    fn idle_shutdown() -> (ShutdownController, broadcast::Receiver<()>) {
        let controller = ShutdownController::new();
        let rx = controller.subscribe();
        (controller, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn nonce_conflict_recovers_within_the_worker() {
        let h = harness(
            MockChain::new(5, 20_000_000_000).with_send_results(vec![
                Err(SettlementError::NonceTooLow {
                    current_nonce: 7,
                    tx_nonce: 5,
                    address: String::new(),
                }),
                Ok("0xdef".to_string()),
            ]),
        );
        let intent = Intent::new(RECIPIENT, "1000000000000000000", "0x", "21000");
        let id = intent.id;
        h.store.insert(intent.clone()).await;

        let (_shutdown, mut rx) = idle_shutdown();
        let outcome = h.worker.settle_with_retries(intent, &mut rx).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Settled("0xdef".to_string()));

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Settled);
        assert_eq!(stored.hash.as_deref(), Some("0xdef"));
        assert_eq!(stored.retry_count, 1);
        // Resynced to 7 on the conflict, advanced past it on success.
        assert_eq!(h.nonce.current(), Some(8));
        assert_eq!(h.chain.send_call_count(), 2);
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit_the_retry_schedule() {
        let h = harness(
            MockChain::new(5, 20_000_000_000).with_send_results(vec![Err(
                SettlementError::ExecutionReverted {
                    reason: "bad call".to_string(),
                    data: None,
                },
            )]),
        );
        let intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        h.store.insert(intent.clone()).await;

        let (_shutdown, mut rx) = idle_shutdown();
        let err = h
            .worker
            .settle_with_retries(intent, &mut rx)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(h.chain.send_call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_lettered_intents_are_not_re_attempted() {
        // Transient error, but the budget is already spent: the processor
        // dead-letters and the worker must stop after one attempt.
        let h = harness(
            MockChain::new(5, 20_000_000_000).with_send_results(vec![Err(
                SettlementError::Network {
                    message: "connection reset".to_string(),
                    code: None,
                },
            )]),
        );
        let mut intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        intent.retry_count = 3;
        let id = intent.id;
        h.store.insert(intent.clone()).await;

        let (_shutdown, mut rx) = idle_shutdown();
        let err = h
            .worker
            .settle_with_retries(intent, &mut rx)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.chain.send_call_count(), 1);

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
        let entries = h.store.dead_letter_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, "Max retries exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_schedule_is_bounded_to_three_total_attempts() {
        let transient = || {
            Err(SettlementError::Network {
                message: "connection reset".to_string(),
                code: None,
            })
        };
        let h = harness(
            MockChain::new(5, 20_000_000_000)
                .with_send_results(vec![transient(), transient(), transient(), transient()]),
        );
        let intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        h.store.insert(intent.clone()).await;

        let (_shutdown, mut rx) = idle_shutdown();
        let err = h
            .worker
            .settle_with_retries(intent, &mut rx)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.chain.send_call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fee_conflicts_carry_a_gas_bump_into_the_next_attempt() {
        let h = harness(
            MockChain::new(5, 20_000_000_000).with_send_results(vec![
                Err(SettlementError::ReplacementFeeTooLow {
                    tx_hash: None,
                    current_gas_price: None,
                    tx_gas_price: None,
                }),
                Ok("0xfee".to_string()),
            ]),
        );
        let intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        let id = intent.id;
        h.store.insert(intent.clone()).await;

        let (_shutdown, mut rx) = idle_shutdown();
        let outcome = h.worker.settle_with_retries(intent, &mut rx).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Settled("0xfee".to_string()));
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Settled);
    }

    #[tokio::test]
    async fn shutdown_before_the_lock_abandons_the_attempt() {
        let h = harness(MockChain::new(5, 20_000_000_000));
        let intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        let id = intent.id;
        h.store.insert(intent.clone()).await;

        let (shutdown, mut rx) = idle_shutdown();
        shutdown.begin();

        let outcome = h.worker.settle_with_retries(intent, &mut rx).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Abandoned);
        assert_eq!(h.chain.send_call_count(), 0);
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().status,
            IntentStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_abandons_between_attempts() {
        let h = harness(
            MockChain::new(5, 20_000_000_000).with_send_results(vec![Err(
                SettlementError::Network {
                    message: "connection reset".to_string(),
                    code: None,
                },
            )]),
        );
        let intent = Intent::new(RECIPIENT, "1", "0x", "21000");
        let id = intent.id;
        h.store.insert(intent.clone()).await;

        let (shutdown, mut rx) = idle_shutdown();
        let store = h.store.clone();
        let chain = h.chain.clone();
        let task = tokio::spawn(async move {
            h.worker.settle_with_retries(intent, &mut rx).await
        });

        // Let the first attempt fail and the worker enter its 100 ms
        // backoff, then signal shutdown well before the backoff elapses.
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.begin();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, ProcessOutcome::Abandoned);
        assert_eq!(chain.send_call_count(), 1);
        // The first attempt's bookkeeping stands; no second attempt ran.
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Pending);
        assert_eq!(stored.retry_count, 1);
    }
}

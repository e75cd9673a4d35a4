use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::info;

use super::nonce::NonceCoordinator;
use super::processor::Processor;
use super::producer::Producer;
use super::queue::{self, WORK_QUEUE_CAPACITY};
use super::registry::InFlightRegistry;
use super::worker::Worker;
use crate::chain::Chain;
use crate::config::Config;
use crate::shutdown::ShutdownController;
use crate::signer::TxSigner;
use crate::store::IntentStore;

/// Settlement engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chain_id: u64,
    pub poll_interval: Duration,
    pub max_retries: i32,
    pub worker_count: usize,
    pub max_gas_price_multiplier: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            poll_interval: Duration::from_millis(2000),
            max_retries: 3,
            worker_count: 2,
            max_gas_price_multiplier: 3,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            chain_id: config.chain_id,
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
            worker_count: config.worker_count,
            max_gas_price_multiplier: config.max_gas_price_multiplier,
        }
    }
}

/// Supervisor for the settlement pipeline: owns the shared state and
/// forks the producer plus N workers. Lifetimes of the nonce coordinator
/// and the registry equal the engine's.
pub struct SettlementEngine {
    config: EngineConfig,
    store: Arc<dyn IntentStore>,
    chain: Arc<dyn Chain>,
    signer: Arc<dyn TxSigner>,
    nonce: Arc<NonceCoordinator>,
    registry: Arc<InFlightRegistry>,
}

impl SettlementEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn IntentStore>,
        chain: Arc<dyn Chain>,
        signer: Arc<dyn TxSigner>,
    ) -> Self {
        Self {
            config,
            store,
            chain,
            signer,
            nonce: Arc::new(NonceCoordinator::new()),
            registry: Arc::new(InFlightRegistry::new()),
        }
    }

    pub fn nonce_coordinator(&self) -> Arc<NonceCoordinator> {
        self.nonce.clone()
    }

    pub fn registry(&self) -> Arc<InFlightRegistry> {
        self.registry.clone()
    }

    /// Spawns the producer and the worker pool. All tasks exit on the
    /// shutdown signal; join the returned handles to wait them out.
    pub fn start(&self, shutdown: &ShutdownController) -> Vec<JoinHandle<()>> {
        let (sender, receiver) = queue::bounded(WORK_QUEUE_CAPACITY);
        let submission_lock = Arc::new(Semaphore::new(1));
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);

        let producer = Producer::new(
            self.store.clone(),
            sender,
            self.registry.clone(),
            self.config.poll_interval,
        );
        handles.push(tokio::spawn(producer.run(shutdown.subscribe())));

        for worker_id in 0..self.config.worker_count {
            let processor = Processor::new(
                self.store.clone(),
                self.chain.clone(),
                self.signer.clone(),
                self.nonce.clone(),
                self.config.clone(),
            );
            let worker = Worker::new(
                worker_id,
                receiver.clone(),
                self.registry.clone(),
                self.store.clone(),
                processor,
                submission_lock.clone(),
            );
            handles.push(tokio::spawn(worker.run(shutdown.subscribe())));
        }

        info!(
            "settlement engine started: {} workers, poll every {:?}",
            self.config.worker_count, self.config.poll_interval
        );
        handles
    }
}

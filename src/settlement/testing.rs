// Hand-rolled mock capabilities for the settlement scenario tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, U256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chain::Chain;
use crate::error::{SettlementError, SettlementResult};
use crate::signer::{TxSigner, UnsignedTransaction};
use crate::store::{DlqReason, Intent, IntentStatus, IntentStore, MemoryIntentStore};

/// Scripted chain: fixed nonce and gas price, a queue of broadcast
/// outcomes, and an optional broadcast delay for slow-chain scenarios.
/// Once the script runs dry, broadcasts succeed with generated hashes.
pub struct MockChain {
    nonce: u64,
    gas_price: U256,
    send_script: Mutex<VecDeque<SettlementResult<String>>>,
    send_calls: AtomicUsize,
    nonce_calls: AtomicUsize,
    send_delay: Option<Duration>,
}

impl MockChain {
    pub fn new(nonce: u64, gas_price: u64) -> Self {
        Self {
            nonce,
            gas_price: U256::from(gas_price),
            send_script: Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
            nonce_calls: AtomicUsize::new(0),
            send_delay: None,
        }
    }

    pub fn with_send_results(self, results: Vec<SettlementResult<String>>) -> Self {
        Self {
            send_script: Mutex::new(results.into()),
            ..self
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn send_call_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn nonce_call_count(&self) -> usize {
        self.nonce_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Chain for MockChain {
    async fn get_nonce(&self, _address: Address) -> SettlementResult<u64> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce)
    }

    async fn get_gas_price(&self) -> SettlementResult<U256> {
        Ok(self.gas_price)
    }

    async fn send_raw(&self, _raw: Bytes) -> SettlementResult<String> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.send_script.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(format!("0xmock{call}")))
    }

    async fn get_tx(&self, _hash: &str) -> SettlementResult<Option<Transaction>> {
        Ok(None)
    }

    async fn wait_for(
        &self,
        _hash: &str,
        _confirmations: u64,
    ) -> SettlementResult<Option<TransactionReceipt>> {
        Ok(None)
    }
}

/// Fixed-identity signer returning an opaque payload; records the nonce
/// of every transaction it signs.
pub struct MockSigner {
    address: Address,
    signed_nonces: std::sync::Mutex<Vec<u64>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x42),
            signed_nonces: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn signed_nonces(&self) -> Vec<u64> {
        self.signed_nonces.lock().unwrap().clone()
    }
}

#[async_trait]
impl TxSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> SettlementResult<Bytes> {
        self.signed_nonces.lock().unwrap().push(tx.nonce);
        Ok(Bytes::from_static(b"signed-payload"))
    }
}

/// Store wrapper counting status writes, for the dedup scenario.
pub struct CountingStore {
    pub inner: MemoryIntentStore,
    processing_writes: AtomicUsize,
    settled_writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryIntentStore) -> Self {
        Self {
            inner,
            processing_writes: AtomicUsize::new(0),
            settled_writes: AtomicUsize::new(0),
        }
    }

    pub fn processing_write_count(&self) -> usize {
        self.processing_writes.load(Ordering::SeqCst)
    }

    pub fn settled_write_count(&self) -> usize {
        self.settled_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentStore for CountingStore {
    async fn get_pending(&self) -> SettlementResult<Vec<Intent>> {
        self.inner.get_pending().await
    }

    async fn get_by_status(&self, status: IntentStatus) -> SettlementResult<Vec<Intent>> {
        self.inner.get_by_status(status).await
    }

    async fn get(&self, id: Uuid) -> SettlementResult<Option<Intent>> {
        self.inner.get(id).await
    }

    async fn get_by_hash(&self, hash: &str) -> SettlementResult<Option<Intent>> {
        self.inner.get_by_hash(hash).await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntentStatus,
        hash: Option<&str>,
    ) -> SettlementResult<()> {
        match status {
            IntentStatus::Processing => {
                self.processing_writes.fetch_add(1, Ordering::SeqCst);
            }
            IntentStatus::Settled => {
                self.settled_writes.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        self.inner.set_status(id, status, hash).await
    }

    async fn increment_retry(&self, id: Uuid) -> SettlementResult<()> {
        self.inner.increment_retry(id).await
    }

    async fn record_error(&self, id: Uuid, error: &str) -> SettlementResult<()> {
        self.inner.record_error(id, error).await
    }

    async fn dead_letter(
        &self,
        intent_id: Uuid,
        reason: DlqReason,
        details: Option<&str>,
    ) -> SettlementResult<()> {
        self.inner.dead_letter(intent_id, reason, details).await
    }
}

/// Store whose polls always fail; exercises producer resilience.
pub struct FailingStore;

#[async_trait]
impl IntentStore for FailingStore {
    async fn get_pending(&self) -> SettlementResult<Vec<Intent>> {
        Err(SettlementError::store("get_pending", "connection refused"))
    }

    async fn get_by_status(&self, _status: IntentStatus) -> SettlementResult<Vec<Intent>> {
        Err(SettlementError::store("get_by_status", "connection refused"))
    }

    async fn get(&self, _id: Uuid) -> SettlementResult<Option<Intent>> {
        Err(SettlementError::store("get", "connection refused"))
    }

    async fn get_by_hash(&self, _hash: &str) -> SettlementResult<Option<Intent>> {
        Err(SettlementError::store("get_by_hash", "connection refused"))
    }

    async fn set_status(
        &self,
        _id: Uuid,
        _status: IntentStatus,
        _hash: Option<&str>,
    ) -> SettlementResult<()> {
        Err(SettlementError::store("set_status", "connection refused"))
    }

    async fn increment_retry(&self, _id: Uuid) -> SettlementResult<()> {
        Err(SettlementError::store("increment_retry", "connection refused"))
    }

    async fn record_error(&self, _id: Uuid, _error: &str) -> SettlementResult<()> {
        Err(SettlementError::store("record_error", "connection refused"))
    }

    async fn dead_letter(
        &self,
        _intent_id: Uuid,
        _reason: DlqReason,
        _details: Option<&str>,
    ) -> SettlementResult<()> {
        Err(SettlementError::store("dead_letter", "connection refused"))
    }
}

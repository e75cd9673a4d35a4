// Single-attempt settlement pipeline
//
// 1. Mark the intent PROCESSING
// 2. Resolve the signer address and validate the payload
// 3. Allocate a nonce (lazily seeded from the chain)
// 4. Quote the gas price (bumped and capped on fee-conflict retries)
// 5. Build, sign and broadcast the transaction
// 6. Write SETTLED together with the hash, then advance the nonce
//
// Steps 1-5 race the shutdown signal: before the broadcast has returned
// the attempt is abandoned on shutdown, leaving the row at PROCESSING for
// boot-time reconciliation. Once the broadcast has returned, step 6
// always runs. Every durable consequence of a failure (audit trail, retry
// counter, PENDING/FAILED transition, DLQ row, nonce resync) is persisted
// before the error is re-surfaced to the worker.

use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::engine::EngineConfig;
use super::nonce::NonceCoordinator;
use crate::chain::Chain;
use crate::error::{SettlementError, SettlementResult};
use crate::signer::{TxSigner, UnsignedTransaction};
use crate::store::{DlqReason, Intent, IntentStatus, IntentStore};

/// How a settlement attempt ended short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Broadcast succeeded and the settlement was persisted.
    Settled(String),
    /// Shutdown fired before the broadcast returned; nothing further was
    /// written and the intent is left to restart reconciliation.
    Abandoned,
}

pub struct Processor {
    store: Arc<dyn IntentStore>,
    chain: Arc<dyn Chain>,
    signer: Arc<dyn TxSigner>,
    nonce: Arc<NonceCoordinator>,
    config: EngineConfig,
}

/// The intent payload parsed into chain types.
struct ValidatedPayload {
    to: Address,
    value: U256,
    data: Bytes,
    gas_limit: U256,
}

impl Processor {
    pub fn new(
        store: Arc<dyn IntentStore>,
        chain: Arc<dyn Chain>,
        signer: Arc<dyn TxSigner>,
        nonce: Arc<NonceCoordinator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            chain,
            signer,
            nonce,
            config,
        }
    }

    /// Runs one settlement attempt. Must be called with the submission
    /// lock held: nonce allocation through broadcast is only safe while
    /// serialized across workers.
    pub async fn process(
        &self,
        intent: &Intent,
        bump_gas: bool,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SettlementResult<ProcessOutcome> {
        info!(intent = %intent.id, retry_count = intent.retry_count, "processing intent");

        let broadcast = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!(intent = %intent.id, "shutdown before broadcast, abandoning attempt");
                return Ok(ProcessOutcome::Abandoned);
            }
            result = self.attempt_until_broadcast(intent, bump_gas) => result,
        };

        let hash = match broadcast {
            Ok(hash) => hash,
            Err(err) => {
                self.persist_failure(intent, &err).await;
                return Err(err);
            }
        };

        // The broadcast returned: the settlement is persisted even while
        // shutting down, so no accepted transaction is ever lost.
        if let Err(err) = self
            .store
            .set_status(intent.id, IntentStatus::Settled, Some(&hash))
            .await
        {
            self.persist_failure(intent, &err).await;
            return Err(err);
        }
        self.nonce.advance();

        info!(intent = %intent.id, hash = %hash, "intent settled");
        Ok(ProcessOutcome::Settled(hash))
    }

    /// Everything up to and including the broadcast; returns the
    /// transaction hash the chain accepted.
    async fn attempt_until_broadcast(
        &self,
        intent: &Intent,
        bump_gas: bool,
    ) -> SettlementResult<String> {
        self.store
            .set_status(intent.id, IntentStatus::Processing, None)
            .await?;

        let from = self.signer.address();
        let payload = validate(intent, from)?;

        let nonce = self.nonce.allocate(self.chain.as_ref(), from).await?;

        let mut gas_price = self.chain.get_gas_price().await?;
        if bump_gas {
            gas_price = bumped_gas_price(gas_price, self.config.max_gas_price_multiplier);
        }

        let unsigned = UnsignedTransaction {
            to: payload.to,
            from,
            value: payload.value,
            data: payload.data,
            gas_limit: payload.gas_limit,
            gas_price,
            nonce,
            chain_id: self.config.chain_id,
        };

        let raw = self.signer.sign(&unsigned).await?;
        self.chain.send_raw(raw).await
    }

    /// Persists the attempt's outcome before the error goes back to the
    /// worker, so that cancellation after this point loses no state.
    async fn persist_failure(&self, intent: &Intent, err: &SettlementError) {
        let formatted = err.to_string();

        if let Err(store_err) = self.store.record_error(intent.id, &formatted).await {
            error!(intent = %intent.id, error = %store_err, "failed to record intent error");
        }

        let transient = err.is_transient();
        let outcome = if transient && intent.retry_count < self.config.max_retries {
            if let SettlementError::NonceTooLow { current_nonce, .. } = err {
                if *current_nonce >= 0 {
                    self.nonce.resync_to(*current_nonce as u64);
                    warn!(
                        intent = %intent.id,
                        nonce = current_nonce,
                        "nonce resynced to chain-authoritative value"
                    );
                }
            }
            warn!(intent = %intent.id, error = %err, "transient failure, intent returned to queue");
            match self.store.increment_retry(intent.id).await {
                Ok(()) => {
                    self.store
                        .set_status(intent.id, IntentStatus::Pending, None)
                        .await
                }
                Err(store_err) => Err(store_err),
            }
        } else if transient {
            warn!(intent = %intent.id, error = %err, "retry budget exhausted, dead-lettering");
            self.store
                .dead_letter(intent.id, DlqReason::MaxRetriesExceeded, Some(&formatted))
                .await
        } else {
            warn!(intent = %intent.id, error = %err, "permanent failure, dead-lettering");
            self.store
                .dead_letter(intent.id, DlqReason::PermanentError, Some(&formatted))
                .await
        };

        if let Err(store_err) = outcome {
            error!(intent = %intent.id, error = %store_err, "failed to persist settlement outcome");
        }
    }
}

/// Payload checks ahead of any chain interaction; every failure is an
/// explicit `Validation` error.
fn validate(intent: &Intent, from: Address) -> SettlementResult<ValidatedPayload> {
    let to = intent.to_address.parse::<Address>().map_err(|e| {
        SettlementError::validation(
            "to",
            format!("malformed recipient {}: {e}", intent.to_address),
        )
    })?;

    if from == Address::zero() {
        return Err(SettlementError::validation(
            "from",
            "signer resolves to the zero address",
        ));
    }

    let value = U256::from_dec_str(&intent.value).map_err(|e| {
        SettlementError::validation("value", format!("bad amount {}: {e}", intent.value))
    })?;

    let calldata = intent.calldata.as_str();
    if !calldata.starts_with("0x") {
        return Err(SettlementError::validation(
            "calldata",
            "missing 0x prefix",
        ));
    }
    let data = hex::decode(&calldata[2..])
        .map(Bytes::from)
        .map_err(|e| SettlementError::validation("calldata", format!("bad hex payload: {e}")))?;

    let gas_limit = U256::from_dec_str(&intent.gas_limit).map_err(|e| {
        SettlementError::validation("gasLimit", format!("bad gas limit {}: {e}", intent.gas_limit))
    })?;

    Ok(ValidatedPayload {
        to,
        value,
        data,
        gas_limit,
    })
}

/// 20% over the fresh quote, capped at `max_multiplier` times the quote.
fn bumped_gas_price(quoted: U256, max_multiplier: u64) -> U256 {
    let bumped = quoted * U256::from(12u64) / U256::from(10u64);
    let cap = quoted * U256::from(max_multiplier.max(1));
    bumped.min(cap)
}

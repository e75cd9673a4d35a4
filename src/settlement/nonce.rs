use std::sync::atomic::{AtomicI64, Ordering};

use ethers::types::Address;
use tracing::info;

use crate::chain::Chain;
use crate::error::SettlementResult;

const UNINITIALIZED: i64 = -1;

/// In-memory nonce coordinator for the single signing identity.
///
/// A single integer cell, lazily seeded from the chain. All reads and
/// writes happen while the submission lock is held, so the cell itself
/// only needs atomicity, not its own critical section.
pub struct NonceCoordinator {
    cell: AtomicI64,
}

impl NonceCoordinator {
    pub fn new() -> Self {
        Self {
            cell: AtomicI64::new(UNINITIALIZED),
        }
    }

    pub fn current(&self) -> Option<u64> {
        let value = self.cell.load(Ordering::SeqCst);
        if value < 0 {
            None
        } else {
            Some(value as u64)
        }
    }

    /// The nonce for the next submission: the cell value, or the chain's
    /// pending nonce on first use.
    pub async fn allocate(&self, chain: &dyn Chain, address: Address) -> SettlementResult<u64> {
        if let Some(nonce) = self.current() {
            return Ok(nonce);
        }
        let nonce = chain.get_nonce(address).await?;
        self.cell.store(nonce as i64, Ordering::SeqCst);
        info!(%address, nonce, "nonce coordinator seeded from chain");
        Ok(nonce)
    }

    /// Called after a confirmed broadcast.
    pub fn advance(&self) {
        self.cell.fetch_add(1, Ordering::SeqCst);
    }

    /// Unconditionally adopts the chain-authoritative value after a nonce
    /// conflict.
    pub fn resync_to(&self, nonce: u64) {
        self.cell.store(nonce as i64, Ordering::SeqCst);
    }
}

impl Default for NonceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub mod evm;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, U256};

use crate::error::SettlementResult;
pub use evm::EvmChain;

/// Chain capability: the EVM-style JSON-RPC surface the pipeline drives.
///
/// Implementations map every transport failure through the RPC error
/// parser so callers only ever see `SettlementError` kinds.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Next usable nonce for the address, pending-pool semantics.
    async fn get_nonce(&self, address: Address) -> SettlementResult<u64>;

    async fn get_gas_price(&self) -> SettlementResult<U256>;

    /// Broadcasts a signed raw transaction, returning its hash.
    async fn send_raw(&self, raw: Bytes) -> SettlementResult<String>;

    async fn get_tx(&self, hash: &str) -> SettlementResult<Option<Transaction>>;

    /// Waits for a receipt with the requested confirmation depth, bounded
    /// at 60 seconds; `None` means the bound elapsed first.
    async fn wait_for(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> SettlementResult<Option<TransactionReceipt>>;
}

use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::{Address, BlockNumber, Bytes, Transaction, TransactionReceipt, H256, U256};
use tracing::debug;

use super::Chain;
use crate::error::{parse_rpc_error, SettlementError, SettlementResult};

/// Upper bound on a single receipt wait.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// JSON-RPC chain client over an HTTP provider.
pub struct EvmChain {
    provider: Provider<Http>,
}

impl EvmChain {
    pub fn connect(rpc_url: &str) -> SettlementResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| SettlementError::Network {
            message: format!("invalid RPC endpoint {rpc_url}: {e}"),
            code: None,
        })?;
        Ok(Self { provider })
    }

    fn classify(err: ProviderError) -> SettlementError {
        parse_rpc_error(&err.to_string(), None)
    }

    fn parse_hash(hash: &str) -> SettlementResult<H256> {
        hash.parse::<H256>()
            .map_err(|e| SettlementError::validation("hash", format!("bad tx hash {hash}: {e}")))
    }
}

#[async_trait]
impl Chain for EvmChain {
    async fn get_nonce(&self, address: Address) -> SettlementResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(Self::classify)?;
        Ok(nonce.as_u64())
    }

    async fn get_gas_price(&self) -> SettlementResult<U256> {
        self.provider.get_gas_price().await.map_err(Self::classify)
    }

    async fn send_raw(&self, raw: Bytes) -> SettlementResult<String> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(Self::classify)?;
        let hash = pending.tx_hash();
        debug!(tx = ?hash, "raw transaction accepted by node");
        Ok(format!("{hash:?}"))
    }

    async fn get_tx(&self, hash: &str) -> SettlementResult<Option<Transaction>> {
        let hash = Self::parse_hash(hash)?;
        self.provider
            .get_transaction(hash)
            .await
            .map_err(Self::classify)
    }

    async fn wait_for(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> SettlementResult<Option<TransactionReceipt>> {
        let tx_hash = Self::parse_hash(hash)?;

        let wait = async {
            loop {
                let receipt = self
                    .provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(Self::classify)?;

                if let Some(receipt) = receipt {
                    if confirmations <= 1 {
                        return Ok(Some(receipt));
                    }
                    if let Some(mined_in) = receipt.block_number {
                        let current = self
                            .provider
                            .get_block_number()
                            .await
                            .map_err(Self::classify)?;
                        if current.as_u64() + 1 >= mined_in.as_u64() + confirmations {
                            return Ok(Some(receipt));
                        }
                    }
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(RECEIPT_TIMEOUT, wait).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }
}

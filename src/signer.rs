use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as EthSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};

use crate::error::{SettlementError, SettlementResult};

/// A fully resolved transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub to: Address,
    pub from: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub nonce: u64,
    pub chain_id: u64,
}

/// Signer capability: the single signing identity behind the worker.
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Produces the raw signed payload for broadcast.
    async fn sign(&self, tx: &UnsignedTransaction) -> SettlementResult<Bytes>;
}

/// Local-key signer over an in-process wallet.
#[derive(Debug)]
pub struct LocalTxSigner {
    wallet: LocalWallet,
}

impl LocalTxSigner {
    pub fn new(private_key: &str, chain_id: u64) -> SettlementResult<Self> {
        let wallet = private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| {
                SettlementError::validation("private_key", format!("unusable signing key: {e}"))
            })?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }
}

#[async_trait]
impl TxSigner for LocalTxSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> SettlementResult<Bytes> {
        let request = TransactionRequest::new()
            .from(tx.from)
            .to(tx.to)
            .value(tx.value)
            .data(tx.data.clone())
            .gas(tx.gas_limit)
            .gas_price(tx.gas_price)
            .nonce(tx.nonce)
            .chain_id(tx.chain_id);

        let typed: TypedTransaction = request.into();
        let signature = self.wallet.sign_transaction(&typed).await.map_err(|e| {
            SettlementError::Unknown {
                cause: format!("signing failed: {e}"),
            }
        })?;
        Ok(typed.rlp_signed(&signature))
    }
}

//! Wallet/transport collaborator boundary
//!
//! The engine never signs. It hands a prepared transaction to the wallet
//! provider and reads chain state back through this trait.

use crate::error::{ProviderError, TransportError};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};

/// Error kind raised when a receipt is not yet indexed by the node
pub const RECEIPT_NOT_FOUND: &str = "TransactionReceiptNotFoundError";

/// Transaction built by the quoting collaborator for a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
    pub gas_limit: Option<U256>,
}

/// Log query against a single chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub chain_id: u64,
    pub addresses: Vec<Address>,
    /// Accepted topic0 values; empty accepts any event
    pub topics: Vec<H256>,
    pub from_block: u64,
    pub to_block: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapTransport: Send + Sync {
    /// Ask the wallet to sign and broadcast, returning the transaction hash
    async fn send_transaction(
        &self,
        chain_id: u64,
        tx: &PreparedTransaction,
    ) -> Result<H256, TransportError>;

    /// Fetch a mined receipt, raising `TransactionReceiptNotFoundError` when absent
    async fn get_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> Result<TransactionReceipt, TransportError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError>;

    async fn block_number(&self, chain_id: u64) -> Result<u64, TransportError>;
}

/// Error returned by transports when a receipt lookup comes back empty
pub fn receipt_not_found(tx_hash: H256) -> TransportError {
    TransportError::Provider(ProviderError::new(
        RECEIPT_NOT_FOUND,
        format!("Transaction receipt with hash \"{:?}\" could not be found", tx_hash),
    ))
}

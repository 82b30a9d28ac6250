//! Shared fixtures for unit tests

use crate::chain::{Chain, ChainRegistry};
use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::events::{address_topic, topics};
use crate::route::{Hop, RouteQuote, RouteType, Token};
use crate::transport::{receipt_not_found, LogQuery, PreparedTransaction, SwapTransport};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ethers::abi::{self, Token as AbiToken};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H160, H256, U256, U64};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub const SOURCE_CHAIN: u64 = 43114;
pub const DEST_CHAIN: u64 = 173750;

pub const USER: Address = H160([0x0a; 20]);
pub const SOURCE_CELL: Address = H160([0xc1; 20]);
pub const DEST_CELL: Address = H160([0xc2; 20]);
pub const SOURCE_ICTT: Address = H160([0xe1; 20]);
pub const DEST_ICTT: Address = H160([0xe2; 20]);
pub const ADAPTER: Address = H160([0xad; 20]);
pub const PAIR: Address = H160([0x9a; 20]);

pub fn token_address(n: u8) -> Address {
    let mut bytes = [0x70u8; 20];
    bytes[19] = n;
    Address::from(bytes)
}

pub fn tx(n: u8) -> H256 {
    H256::from_low_u64_be(0x1000 + n as u64)
}

fn token(chain_id: u64, n: u8, symbol: &str) -> Token {
    Token {
        chain_id,
        address: token_address(n),
        symbol: symbol.to_string(),
        decimals: 18,
    }
}

/// Chain with one cell and one ICTT contract
pub fn chain(chain_id: u64, block_ms: u64) -> Chain {
    let (cell, ictt) = if chain_id == DEST_CHAIN {
        (DEST_CELL, DEST_ICTT)
    } else {
        (SOURCE_CELL, SOURCE_ICTT)
    };

    Chain {
        chain_id,
        name: format!("chain-{}", chain_id),
        blockchain_id: H256::from_low_u64_be(chain_id),
        rpc_urls: vec!["http://127.0.0.1:9650".to_string()],
        wrapped_native: token_address(0xff),
        teleporter_messenger: Some(Address::repeat_byte(0x7e)),
        ictt: vec![ictt],
        min_gas_price: U256::from(25_000_000_000u64),
        avg_block_time_ms: block_ms,
        avg_block_time_sample_range: 50,
        adapters: vec![ADAPTER],
        cells: vec![cell],
        confirmation_blocks: crate::chain::finality::derived_confirmations(block_ms),
    }
}

pub fn registry() -> ChainRegistry {
    ChainRegistry::from_chains([chain(SOURCE_CHAIN, 2000), chain(DEST_CHAIN, 1000)])
}

/// Engine settings with short timeouts for paused-clock tests
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        max_retries: 3,
        retry_max_delay_ms: 8_000,
        hop_timeout_blocks: 30,
        min_hop_timeout_ms: 30_000,
        notification_capacity: 64,
        health_check_interval_secs: 30,
    }
}

fn prepared_tx() -> PreparedTransaction {
    PreparedTransaction {
        to: SOURCE_CELL,
        data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        value: U256::zero(),
        gas_limit: Some(U256::from(500_000u64)),
    }
}

/// USDC -> WAVAX on the source chain
pub fn single_chain_quote() -> RouteQuote {
    let token_in = token(SOURCE_CHAIN, 1, "USDC");
    let token_out = token(SOURCE_CHAIN, 2, "WAVAX");

    RouteQuote {
        id: Uuid::new_v4(),
        source_chain_id: SOURCE_CHAIN,
        destination_chain_id: SOURCE_CHAIN,
        token_in: token_in.clone(),
        token_out: token_out.clone(),
        amount_in: U256::from(1_000u64),
        expected_amount_out: U256::from(990u64),
        min_amount_out: U256::from(980u64),
        hops: vec![Hop {
            route_type: RouteType::Swap,
            chain_id: SOURCE_CHAIN,
            destination_chain_id: None,
            via: ADAPTER,
            token_in,
            token_out,
            amount_in: U256::from(1_000u64),
            expected_amount_out: U256::from(990u64),
            min_amount_out: U256::from(980u64),
        }],
        fees: vec![],
        estimated_execution_ms: 4_000,
        expires_at: Utc::now() + Duration::minutes(5),
        sender: USER,
        recipient: USER,
        transaction: prepared_tx(),
    }
}

/// USDC swapped to WAVAX on the source chain, then bridged to the destination
pub fn cross_chain_quote() -> RouteQuote {
    let usdc = token(SOURCE_CHAIN, 1, "USDC");
    let wavax = token(SOURCE_CHAIN, 2, "WAVAX");
    let bridged = token(DEST_CHAIN, 3, "WAVAX.e");

    RouteQuote {
        id: Uuid::new_v4(),
        source_chain_id: SOURCE_CHAIN,
        destination_chain_id: DEST_CHAIN,
        token_in: usdc.clone(),
        token_out: bridged.clone(),
        amount_in: U256::from(1_000u64),
        expected_amount_out: U256::from(985u64),
        min_amount_out: U256::from(975u64),
        hops: vec![
            Hop {
                route_type: RouteType::Swap,
                chain_id: SOURCE_CHAIN,
                destination_chain_id: None,
                via: ADAPTER,
                token_in: usdc,
                token_out: wavax.clone(),
                amount_in: U256::from(1_000u64),
                expected_amount_out: U256::from(990u64),
                min_amount_out: U256::from(980u64),
            },
            Hop {
                route_type: RouteType::Bridge,
                chain_id: SOURCE_CHAIN,
                destination_chain_id: Some(DEST_CHAIN),
                via: SOURCE_CELL,
                token_in: wavax,
                token_out: bridged,
                amount_in: U256::from(990u64),
                expected_amount_out: U256::from(985u64),
                min_amount_out: U256::from(975u64),
            },
        ],
        fees: vec![],
        estimated_execution_ms: 12_000,
        expires_at: Utc::now() + Duration::minutes(5),
        sender: USER,
        recipient: USER,
        transaction: prepared_tx(),
    }
}

pub fn log_with(address: Address, topics: Vec<H256>, data: Vec<u8>, block: u64) -> Log {
    Log {
        address,
        topics,
        data: Bytes::from(data),
        block_number: Some(U64::from(block)),
        ..Default::default()
    }
}

/// Pair swap paying `amount_out` of token1 to `to`
pub fn swap_log(to: Address, amount_out: U256, block: u64) -> Log {
    log_with(
        PAIR,
        vec![*topics::SWAP, address_topic(ADAPTER), address_topic(to)],
        abi::encode(&[
            AbiToken::Uint(U256::one()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Uint(U256::zero()),
            AbiToken::Uint(amount_out),
        ]),
        block,
    )
}

pub fn withdrawn_log(contract: Address, recipient: Address, amount: U256, block: u64) -> Log {
    log_with(
        contract,
        vec![*topics::TOKENS_WITHDRAWN, address_topic(recipient)],
        abi::encode(&[AbiToken::Uint(amount)]),
        block,
    )
}

pub fn rollback_log(receiver: Address, token: Address, amount: U256, block: u64) -> Log {
    log_with(
        DEST_CELL,
        vec![*topics::ROLLBACK, address_topic(receiver), address_topic(token)],
        abi::encode(&[AbiToken::Uint(amount)]),
        block,
    )
}

pub fn cell_swap_failed_log(cell: Address, block: u64) -> Log {
    log_with(
        cell,
        vec![*topics::CELL_SWAP_FAILED],
        abi::encode(&[
            AbiToken::Address(token_address(2)),
            AbiToken::Uint(U256::from(990u64)),
            AbiToken::Address(token_address(3)),
            AbiToken::Uint(U256::from(985u64)),
        ]),
        block,
    )
}

pub fn call_failed_log(contract: Address, recipient_contract: Address, block: u64) -> Log {
    log_with(
        contract,
        vec![*topics::CALL_FAILED, address_topic(recipient_contract)],
        abi::encode(&[AbiToken::Uint(U256::from(990u64))]),
        block,
    )
}

/// Successful receipt carrying `logs`, with log positions filled in
pub fn receipt_with(tx_hash: H256, block: u64, logs: Vec<Log>) -> TransactionReceipt {
    let logs = logs
        .into_iter()
        .enumerate()
        .map(|(i, mut log)| {
            log.transaction_hash = Some(tx_hash);
            log.block_number = Some(U64::from(block));
            log.log_index = Some(U256::from(i));
            log
        })
        .collect();

    TransactionReceipt {
        transaction_hash: tx_hash,
        block_number: Some(U64::from(block)),
        status: Some(U64::one()),
        logs,
        ..Default::default()
    }
}

/// In-memory chain state behind the transport trait
#[derive(Default)]
pub struct FakeTransport {
    send_result: Mutex<Option<Result<H256, TransportError>>>,
    queued_sends: Mutex<VecDeque<Result<H256, TransportError>>>,
    sent: Mutex<Vec<(u64, PreparedTransaction)>>,
    receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    receipt_errors: Mutex<VecDeque<TransportError>>,
    heads: Mutex<HashMap<u64, u64>>,
    logs: Mutex<HashMap<u64, Vec<Log>>>,
    receipt_calls: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wallet answers every send with `result`
    pub fn with_send(self, result: Result<H256, TransportError>) -> Self {
        *self.send_result.lock().unwrap() = Some(result);
        self
    }

    /// Answer the next send with `result`, ahead of the default
    pub fn queue_send(&self, result: Result<H256, TransportError>) {
        self.queued_sends.lock().unwrap().push_back(result);
    }

    pub fn set_head(&self, chain_id: u64, block: u64) {
        self.heads.lock().unwrap().insert(chain_id, block);
    }

    /// Make a receipt fetchable without exposing its logs to log queries
    pub fn add_receipt(&self, receipt: TransactionReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.transaction_hash, receipt);
    }

    /// Make a receipt fetchable and its logs visible on `chain_id`
    pub fn add_chain_receipt(&self, chain_id: u64, receipt: TransactionReceipt) {
        self.logs
            .lock()
            .unwrap()
            .entry(chain_id)
            .or_default()
            .extend(receipt.logs.iter().cloned());
        self.add_receipt(receipt);
    }

    /// Fail the next receipt lookup with `error`
    pub fn fail_next_receipt(&self, error: TransportError) {
        self.receipt_errors.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<(u64, PreparedTransaction)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn receipt_calls(&self) -> u32 {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwapTransport for FakeTransport {
    async fn send_transaction(
        &self,
        chain_id: u64,
        tx: &PreparedTransaction,
    ) -> Result<H256, TransportError> {
        self.sent.lock().unwrap().push((chain_id, tx.clone()));
        if let Some(result) = self.queued_sends.lock().unwrap().pop_front() {
            return result;
        }
        self.send_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(tx_hash_for(chain_id)))
    }

    async fn get_receipt(
        &self,
        _chain_id: u64,
        tx_hash: H256,
    ) -> Result<TransactionReceipt, TransportError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.receipt_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.receipts
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| receipt_not_found(tx_hash))
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError> {
        let logs = self.logs.lock().unwrap();
        let matching = logs
            .get(&query.chain_id)
            .map(|logs| {
                logs.iter()
                    .filter(|log| {
                        let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                        block >= query.from_block && block <= query.to_block
                    })
                    .filter(|log| query.addresses.is_empty() || query.addresses.contains(&log.address))
                    .filter(|log| {
                        query.topics.is_empty()
                            || log.topics.first().is_some_and(|t| query.topics.contains(t))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(matching)
    }

    async fn block_number(&self, chain_id: u64) -> Result<u64, TransportError> {
        self.heads
            .lock()
            .unwrap()
            .get(&chain_id)
            .copied()
            .ok_or(TransportError::UnsupportedChain(chain_id))
    }
}

/// Hash the fake wallet returns when no send result is configured
pub fn tx_hash_for(chain_id: u64) -> H256 {
    H256::from_low_u64_be(0xabc0_0000 + chain_id)
}

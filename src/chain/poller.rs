//! Per-chain poller streaming confirmed swap-related receipts
//!
//! One poller runs for every chain a route touches. It only queries blocks at
//! or below the confirmed head, so pending logs never reach the correlator.

use super::finality::confirmed_head;
use super::Chain;
use crate::error::EngineResult;
use crate::events::{decode_log, topics, CellEvent};
use crate::retry::{retry_transient, Backoff, RetryErrorDetails};
use crate::route::RouteQuote;
use crate::swap::machine::FailureDetail;
use crate::transport::{LogQuery, SwapTransport};

use ethers::types::{Address, Log, TransactionReceipt, H256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum block span of a single log query
const MAX_BLOCK_RANGE: u64 = 2_048;

/// Message from a poller to the swap run that owns it
#[derive(Debug, Clone)]
pub enum Observation {
    Receipt {
        swap_id: Uuid,
        chain_id: u64,
        receipt: TransactionReceipt,
    },
    Failed {
        swap_id: Uuid,
        chain_id: u64,
        failure: FailureDetail,
    },
}

/// Which lifecycle logs on a chain belong to the watched route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    pub contracts: Vec<Address>,
    pub topics: Vec<H256>,
    /// Route sender and recipient
    pub accounts: Vec<Address>,
    pub cells: Vec<Address>,
}

impl WatchFilter {
    pub fn for_route(chain: &Chain, quote: &RouteQuote) -> Self {
        let mut accounts = vec![quote.sender];
        if quote.recipient != quote.sender {
            accounts.push(quote.recipient);
        }

        Self {
            contracts: chain.watched_contracts(),
            topics: topics::lifecycle(),
            accounts,
            cells: chain.cells.clone(),
        }
    }

    /// Whether a log is addressed to the watched route
    pub fn matches(&self, log: &Log) -> bool {
        match decode_log(log) {
            Ok(Some(CellEvent::Rollback { receiver, .. })) => self.accounts.contains(&receiver),
            Ok(Some(CellEvent::TokensWithdrawn { recipient, .. })) => {
                self.accounts.contains(&recipient) || self.cells.contains(&recipient)
            }
            Ok(Some(CellEvent::CallFailed {
                recipient_contract, ..
            })) => self.cells.contains(&recipient_contract),
            Ok(Some(CellEvent::CellSwapFailed { .. })) => self.cells.contains(&log.address),
            _ => false,
        }
    }
}

/// Polls one chain for a single swap run
pub struct ChainPoller {
    swap_id: Uuid,
    chain: Arc<Chain>,
    transport: Arc<dyn SwapTransport>,
    filter: WatchFilter,
    from_block: u64,
    backoff: Backoff,
    retry_details: RetryErrorDetails,
    seen: HashSet<H256>,
    tx: mpsc::Sender<Observation>,
}

impl ChainPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swap_id: Uuid,
        chain: Arc<Chain>,
        transport: Arc<dyn SwapTransport>,
        filter: WatchFilter,
        from_block: u64,
        backoff: Backoff,
        retry_details: RetryErrorDetails,
        tx: mpsc::Sender<Observation>,
    ) -> Self {
        Self {
            swap_id,
            chain,
            transport,
            filter,
            from_block,
            backoff,
            retry_details,
            seen: HashSet::new(),
            tx,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Polling loop. Ends on a terminal error or when the run drops its receiver.
    pub async fn run(mut self) {
        let chain_id = self.chain.chain_id;
        info!(
            "Polling chain {} from block {} for swap {}",
            chain_id, self.from_block, self.swap_id
        );
        crate::metrics::record_poller_started(chain_id);

        loop {
            if let Err(e) = self.poll_once().await {
                warn!("Poller for chain {} stopped: {}", chain_id, e);
                let failure = FailureDetail::from_error(&e);
                let _ = self
                    .tx
                    .send(Observation::Failed {
                        swap_id: self.swap_id,
                        chain_id,
                        failure,
                    })
                    .await;
                break;
            }

            if self.tx.is_closed() {
                break;
            }

            tokio::time::sleep(self.chain.block_time()).await;
        }

        crate::metrics::record_poller_stopped(chain_id);
    }

    /// Scan newly confirmed blocks once
    pub async fn poll_once(&mut self) -> EngineResult<()> {
        let chain_id = self.chain.chain_id;

        let head = retry_transient(&self.retry_details, &self.backoff, "block number", || {
            self.transport.block_number(chain_id)
        })
        .await?;

        let confirmed = match confirmed_head(head, self.chain.confirmation_blocks) {
            Some(confirmed) if confirmed >= self.from_block => confirmed,
            _ => return Ok(()),
        };
        let to_block = std::cmp::min(confirmed, self.from_block + MAX_BLOCK_RANGE - 1);

        debug!(
            "Chain {}: scanning blocks {} to {}",
            chain_id, self.from_block, to_block
        );

        let query = LogQuery {
            chain_id,
            addresses: self.filter.contracts.clone(),
            topics: self.filter.topics.clone(),
            from_block: self.from_block,
            to_block,
        };
        let logs = retry_transient(&self.retry_details, &self.backoff, "get logs", || {
            self.transport.get_logs(&query)
        })
        .await?;

        let mut tx_hashes = Vec::new();
        for log in logs.iter().filter(|l| self.filter.matches(l)) {
            if let Some(hash) = log.transaction_hash {
                if !tx_hashes.contains(&hash) && !self.seen.contains(&hash) {
                    tx_hashes.push(hash);
                }
            }
        }

        for tx_hash in tx_hashes {
            let receipt = retry_transient(&self.retry_details, &self.backoff, "get receipt", || {
                self.transport.get_receipt(chain_id, tx_hash)
            })
            .await?;

            self.seen.insert(tx_hash);
            let observation = Observation::Receipt {
                swap_id: self.swap_id,
                chain_id,
                receipt,
            };
            if self.tx.send(observation).await.is_err() {
                return Ok(());
            }
        }

        self.from_block = to_block + 1;
        Ok(())
    }
}

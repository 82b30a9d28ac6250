//! Chain module - static chain parameters and per-chain RPC access
//!
//! This module provides:
//! - The chain registry, loaded once from configuration and read-only afterwards
//! - Confirmation depth and hop timeout derived from each chain's block time
//! - Multi-RPC providers with automatic failover behind the swap transport
//! - Cancellable per-chain pollers that stream confirmed receipts

pub mod finality;
pub mod poller;
pub mod provider;

pub use finality::{confirmed_head, is_confirmed};
pub use poller::{ChainPoller, Observation, WatchFilter};
pub use provider::{ChainProvider, RpcTransport};

use crate::config::{ChainConfig, EngineConfig, Settings};
use crate::error::{EngineError, EngineResult};

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Static parameters of a supported chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chain {
    pub chain_id: u64,
    pub name: String,
    /// Cross-chain messaging identifier used by Teleporter
    pub blockchain_id: H256,
    #[serde(skip)]
    pub rpc_urls: Vec<String>,
    pub wrapped_native: Address,
    pub teleporter_messenger: Option<Address>,
    /// ICTT token home/remote contracts
    pub ictt: Vec<Address>,
    pub min_gas_price: U256,
    pub avg_block_time_ms: u64,
    pub avg_block_time_sample_range: u64,
    pub adapters: Vec<Address>,
    pub cells: Vec<Address>,
    pub confirmation_blocks: u64,
}

impl Chain {
    pub fn from_config(config: &ChainConfig) -> Self {
        let confirmation_blocks = config
            .confirmation_blocks
            .unwrap_or_else(|| finality::derived_confirmations(config.avg_block_time_ms));

        Self {
            chain_id: config.chain_id,
            name: config.name.clone(),
            blockchain_id: config.blockchain_id,
            rpc_urls: config.rpc_urls.clone(),
            wrapped_native: config.wrapped_native,
            teleporter_messenger: config.teleporter_messenger,
            ictt: config.ictt.clone(),
            min_gas_price: U256::from(config.min_gas_price_gwei) * U256::exp10(9),
            avg_block_time_ms: config.avg_block_time_ms,
            avg_block_time_sample_range: config.avg_block_time_sample_range,
            adapters: config.adapters.clone(),
            cells: config.cells.clone(),
            confirmation_blocks,
        }
    }

    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.avg_block_time_ms)
    }

    /// Expected time until a freshly mined block reaches confirmation depth
    pub fn confirmation_latency(&self) -> Duration {
        Duration::from_millis(self.avg_block_time_ms.saturating_mul(self.confirmation_blocks))
    }

    /// Upper bound for waiting on a hop that lands on this chain
    pub fn hop_timeout(&self, config: &EngineConfig) -> Duration {
        let blocks_ms = self
            .avg_block_time_ms
            .saturating_mul(config.hop_timeout_blocks);
        self.confirmation_latency() + Duration::from_millis(blocks_ms.max(config.min_hop_timeout_ms))
    }

    /// Contracts on this chain that emit Cell and ICTT lifecycle events
    pub fn watched_contracts(&self) -> Vec<Address> {
        let mut contracts = self.cells.clone();
        for address in &self.ictt {
            if !contracts.contains(address) {
                contracts.push(*address);
            }
        }
        contracts
    }

    pub fn is_cell(&self, address: &Address) -> bool {
        self.cells.contains(address)
    }
}

/// Registry of all supported chains
#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: HashMap<u64, Arc<Chain>>,
}

impl ChainRegistry {
    /// Build the registry from all enabled chains in the settings
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let mut chains = HashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            if chain_config.avg_block_time_ms == 0 {
                return Err(EngineError::Config(format!(
                    "Chain {} has a zero average block time",
                    name
                )));
            }
            if chains.contains_key(&chain_config.chain_id) {
                return Err(EngineError::Config(format!(
                    "Chain id {} is configured twice",
                    chain_config.chain_id
                )));
            }

            let chain = Chain::from_config(chain_config);
            debug!(
                "Registered chain {} ({}) with {} confirmation blocks",
                chain.name, chain.chain_id, chain.confirmation_blocks
            );
            chains.insert(chain.chain_id, Arc::new(chain));
        }

        info!("Chain registry loaded with {} chains", chains.len());
        Ok(Self { chains })
    }

    /// Build a registry from already constructed chains
    pub fn from_chains(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|c| (c.chain_id, Arc::new(c)))
                .collect(),
        }
    }

    pub fn get_chain(&self, chain_id: u64) -> Option<Arc<Chain>> {
        self.chains.get(&chain_id).cloned()
    }

    /// Look up a chain, treating a missing chain as unsupported
    pub fn require_chain(&self, chain_id: u64) -> EngineResult<Arc<Chain>> {
        self.get_chain(chain_id).ok_or_else(|| {
            warn!("Chain {} is not supported", chain_id);
            EngineError::ChainNotFound { chain_id }
        })
    }

    /// All chains, ordered by chain id
    pub fn chains(&self) -> Vec<Arc<Chain>> {
        let mut chains: Vec<_> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.chain_id);
        chains
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

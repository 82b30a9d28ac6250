//! Chain provider with multi-RPC support and automatic failover, and the
//! JSON-RPC implementation of the swap transport

use super::{Chain, ChainRegistry};
use crate::config::WalletConfig;
use crate::error::{EngineError, EngineResult, ProviderError, TransportError};
use crate::transport::{receipt_not_found, LogQuery, PreparedTransaction, SwapTransport};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError as RpcClientError, RpcError};
use ethers::types::{Address, Filter, Log, TransactionReceipt, TransactionRequest, H256, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Map an ethers provider error onto a provider error kind
pub fn classify_rpc_error(error: &RpcClientError) -> TransportError {
    if let Some(response) = error.as_error_response() {
        let kind = match response.code {
            -32000 => "InvalidInputRpcError",
            -32602 => "InvalidParamsRpcError",
            -32603 => "InternalRpcError",
            -32005 => "LimitExceededRpcError",
            4001 => return TransportError::UserRejected(response.message.clone()),
            _ => "RpcRequestError",
        };
        return ProviderError::new(kind, response.message.clone()).into();
    }

    ProviderError::new("HttpRequestError", error.to_string()).into()
}

/// Errors worth switching RPC endpoints for
fn is_endpoint_failure(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::Provider(p) if p.kind == "HttpRequestError" || p.kind == "LimitExceededRpcError"
    )
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain: Arc<Chain>,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    pub fn new(chain: Arc<Chain>) -> EngineResult<Self> {
        let mut http_providers = Vec::new();

        for url in &chain.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", chain.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(EngineError::Config(format!(
                "No valid RPC providers for chain {}",
                chain.chain_id
            )));
        }

        Ok(Self {
            chain,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub async fn block_number(&self) -> Result<u64, TransportError> {
        let mut last = None;
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    let error = classify_rpc_error(&e);
                    if !is_endpoint_failure(&error) {
                        return Err(error);
                    }
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.chain.chain_id, e
                    );
                    self.failover();
                    last = Some(error);
                }
            }
        }

        Err(last.unwrap_or_else(|| TransportError::Other("no providers".to_string())))
    }

    pub async fn get_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt, TransportError> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| classify_rpc_error(&e))?
            .ok_or_else(|| receipt_not_found(tx_hash))
    }

    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        let mut last = None;
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    let error = classify_rpc_error(&e);
                    if !is_endpoint_failure(&error) {
                        return Err(error);
                    }
                    warn!("Failed to get logs from chain {}: {}", self.chain.chain_id, e);
                    self.failover();
                    last = Some(error);
                }
            }
        }

        Err(last.unwrap_or_else(|| TransportError::Other("no providers".to_string())))
    }

    /// Node gas price, floored at the chain's configured minimum
    pub async fn gas_price(&self) -> Result<U256, TransportError> {
        let price = self
            .http()
            .get_gas_price()
            .await
            .map_err(|e| classify_rpc_error(&e))?;
        Ok(std::cmp::max(price, self.chain.min_gas_price))
    }

    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain.chain_id, e);
                false
            }
        }
    }
}

/// Build an ethers filter for a log query
pub fn log_filter(query: &LogQuery) -> Filter {
    let mut filter = Filter::new()
        .from_block(query.from_block)
        .to_block(query.to_block);
    if !query.addresses.is_empty() {
        filter = filter.address(query.addresses.clone());
    }
    if !query.topics.is_empty() {
        filter = filter.topic0(query.topics.clone());
    }
    filter
}

/// Swap transport over JSON-RPC: chain reads through the registry's RPC
/// endpoints, signing delegated to an external wallet endpoint
pub struct RpcTransport {
    providers: HashMap<u64, Arc<ChainProvider>>,
    wallet: Provider<Http>,
    account: Address,
}

impl RpcTransport {
    pub fn new(registry: &ChainRegistry, wallet: &WalletConfig) -> EngineResult<Self> {
        let mut providers = HashMap::new();
        for chain in registry.chains() {
            let provider = ChainProvider::new(chain.clone())?;
            providers.insert(chain.chain_id, Arc::new(provider));
        }

        let wallet_provider = Provider::<Http>::try_from(wallet.endpoint.as_str())
            .map_err(|e| EngineError::Config(format!("Invalid wallet endpoint: {}", e)))?;

        info!(
            "RPC transport ready for {} chains, sending from {:?}",
            providers.len(),
            wallet.account
        );

        Ok(Self {
            providers,
            wallet: wallet_provider,
            account: wallet.account,
        })
    }

    fn provider(&self, chain_id: u64) -> Result<&Arc<ChainProvider>, TransportError> {
        self.providers
            .get(&chain_id)
            .ok_or(TransportError::UnsupportedChain(chain_id))
    }

    /// Connectivity of every chain, by chain id
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let checks = self.providers.iter().map(|(chain_id, provider)| async move {
            (*chain_id, provider.health_check().await)
        });
        let mut results = futures::future::join_all(checks).await;
        results.sort_by_key(|(id, _)| *id);
        results
    }
}

#[async_trait]
impl SwapTransport for RpcTransport {
    async fn send_transaction(
        &self,
        chain_id: u64,
        tx: &PreparedTransaction,
    ) -> Result<H256, TransportError> {
        let provider = self.provider(chain_id)?;
        let gas_price = provider.gas_price().await?;

        let mut request = TransactionRequest::new()
            .from(self.account)
            .to(tx.to)
            .data(tx.data.clone())
            .value(tx.value)
            .gas_price(gas_price)
            .chain_id(chain_id);
        if let Some(gas) = tx.gas_limit {
            request = request.gas(gas);
        }

        debug!("Requesting wallet signature on chain {} for {:?}", chain_id, tx.to);
        let tx_hash: H256 = self
            .wallet
            .request("eth_sendTransaction", [request])
            .await
            .map_err(|e| classify_rpc_error(&e))?;

        info!("Wallet broadcast {:?} on chain {}", tx_hash, chain_id);
        Ok(tx_hash)
    }

    async fn get_receipt(
        &self,
        chain_id: u64,
        tx_hash: H256,
    ) -> Result<TransactionReceipt, TransportError> {
        self.provider(chain_id)?.get_receipt(tx_hash).await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, TransportError> {
        self.provider(query.chain_id)?
            .get_logs(&log_filter(query))
            .await
    }

    async fn block_number(&self, chain_id: u64) -> Result<u64, TransportError> {
        self.provider(chain_id)?.block_number().await
    }
}

//! Quote refresh
//!
//! Quotes come from an external quoting service. Refreshes are debounced and
//! tagged with a generation; a response is only applied if no newer refresh
//! started while it was in flight.

use crate::config::QuotingConfig;
use crate::error::{EngineError, EngineResult};
use crate::route::{RouteQuote, Token};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters sent to the quoting service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: U256,
    pub sender: Address,
    pub recipient: Address,
    pub slippage_bps: u32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quotes(&self, request: &QuoteRequest) -> EngineResult<Vec<RouteQuote>>;
}

/// Quoting service reached over HTTP
pub struct HttpQuoteSource {
    client: reqwest::Client,
    url: String,
}

impl HttpQuoteSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("cell-swap-engine")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Source configured by the `quoting` section, if a non-empty URL is set
    pub fn from_config(config: &QuotingConfig) -> EngineResult<Option<Self>> {
        config
            .url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(url.clone(), Duration::from_millis(config.timeout_ms)))
            .transpose()
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_quotes(&self, request: &QuoteRequest) -> EngineResult<Vec<RouteQuote>> {
        let quotes = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RouteQuote>>()
            .await?;
        Ok(quotes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(Vec<RouteQuote>),
    /// A newer refresh started before this one completed
    Superseded,
}

pub struct QuoteRefresher {
    source: Arc<dyn QuoteSource>,
    debounce: Duration,
    generation: AtomicU64,
}

impl QuoteRefresher {
    pub fn new(source: Arc<dyn QuoteSource>, debounce: Duration) -> Self {
        Self {
            source,
            debounce,
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(source: Arc<dyn QuoteSource>, config: &QuotingConfig) -> Self {
        Self::new(source, Duration::from_millis(config.debounce_ms))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Debounced quote fetch. Structurally invalid quotes are dropped.
    pub async fn refresh(&self, request: QuoteRequest) -> EngineResult<RefreshOutcome> {
        if request.amount_in.is_zero() {
            return Err(EngineError::InvalidRoute(
                "quote amount must be positive".to_string(),
            ));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.debounce).await;

        if self.is_stale(generation) {
            debug!("Quote refresh {} superseded before fetch", generation);
            crate::metrics::record_quote_refresh("superseded");
            return Ok(RefreshOutcome::Superseded);
        }

        let quotes = match self.source.fetch_quotes(&request).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Quote refresh {} failed: {}", generation, e);
                crate::metrics::record_quote_refresh("failed");
                return Err(e);
            }
        };

        if self.is_stale(generation) {
            debug!("Quote refresh {} superseded on arrival", generation);
            crate::metrics::record_quote_refresh("superseded");
            return Ok(RefreshOutcome::Superseded);
        }

        let received = quotes.len();
        let quotes: Vec<_> = quotes
            .into_iter()
            .filter(|q| match q.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Dropping quote {}: {}", q.id, e);
                    false
                }
            })
            .collect();

        info!(
            "Quote refresh {} applied {} of {} quotes",
            generation,
            quotes.len(),
            received
        );
        crate::metrics::record_quote_refresh("applied");
        Ok(RefreshOutcome::Applied(quotes))
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

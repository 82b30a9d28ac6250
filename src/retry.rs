//! Transient error classification and bounded backoff
//!
//! Some provider error kinds are inherently transient (a receipt that is not
//! indexed yet). Others are a generic bucket that is transient only for one
//! known cause: `InvalidInputRpcError` is retried when the node refuses to
//! serve unfinalized data, and is terminal for every other invalid input.

use crate::chain::Chain;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, TransportError};
use crate::transport::RECEIPT_NOT_FOUND;

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref DEFAULT_DETAILS: RetryErrorDetails = RetryErrorDetails::default();
}

/// Retryable provider error kinds and the detail substrings that qualify them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryErrorDetails {
    kinds: HashMap<String, Vec<String>>,
}

impl RetryErrorDetails {
    /// Empty registry: nothing is retryable
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a kind. An empty detail list makes the kind alone sufficient.
    pub fn with_kind<I, S>(mut self, kind: impl Into<String>, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds
            .insert(kind.into(), details.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the error is transient and safe to retry
    pub fn is_retryable(&self, error: &TransportError) -> bool {
        let TransportError::Provider(provider_error) = error else {
            return false;
        };

        match self.kinds.get(&provider_error.kind) {
            None => false,
            Some(details) if details.is_empty() => true,
            Some(details) => details
                .iter()
                .any(|d| provider_error.detail.contains(d.as_str())),
        }
    }
}

impl Default for RetryErrorDetails {
    fn default() -> Self {
        Self::empty()
            .with_kind(RECEIPT_NOT_FOUND, Vec::<String>::new())
            .with_kind("TransactionNotFoundError", Vec::<String>::new())
            .with_kind("BlockNotFoundError", Vec::<String>::new())
            .with_kind("InvalidInputRpcError", ["cannot query unfinalized data"])
    }
}

/// Classify an error against the default registry
pub fn is_retryable(error: &TransportError) -> bool {
    DEFAULT_DETAILS.is_retryable(error)
}

/// Exponential backoff anchored to a chain's block time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn for_chain(chain: &Chain, config: &EngineConfig) -> Self {
        Self {
            base: chain.block_time(),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying transient errors with backoff.
///
/// Terminal errors are returned as `EngineError::Transport` immediately; running
/// out of retries returns `EngineError::RetriesExhausted` with the last error.
pub async fn retry_transient<T, F, Fut>(
    details: &RetryErrorDetails,
    backoff: &Backoff,
    operation: &str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if !details.is_retryable(&e) => {
                return Err(EngineError::Transport(e));
            }
            Err(e) if attempt >= backoff.max_retries => {
                warn!("{} failed after {} attempts: {}", operation, attempt + 1, e);
                return Err(EngineError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    last: e,
                });
            }
            Err(e) => {
                let delay = backoff.delay(attempt);
                if let TransportError::Provider(p) = &e {
                    crate::metrics::record_retry(operation, &p.kind);
                }
                debug!(
                    "{} attempt {} hit transient error: {}, retrying in {:?}",
                    operation,
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

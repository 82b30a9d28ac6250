//! Error types for the Cell Swap Engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by an RPC provider or wallet endpoint.
///
/// `kind` is the error name (e.g. `InvalidInputRpcError`) and `detail` is the
/// provider's message text. Together they drive retry classification.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct ProviderError {
    pub kind: String,
    pub detail: String,
}

impl ProviderError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the wallet/transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("user rejected the request: {0}")]
    UserRejected(String),

    #[error("chain {0} is not supported by the transport")]
    UnsupportedChain(u64),

    #[error("transport error: {0}")]
    Other(String),
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quote provider error: {0}")]
    QuoteProvider(#[from] reqwest::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: TransportError,
    },

    #[error("Chain {chain_id} is not supported")]
    ChainNotFound { chain_id: u64 },

    #[error("Quote {quote_id} expired at {expired_at}")]
    QuoteExpired { quote_id: String, expired_at: String },

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Event decoding error: {0}")]
    EventDecoding(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Swap history for {tx_hash} not found")]
    HistoryNotFound { tx_hash: String },

    #[error("Invalid preference: {0}")]
    InvalidPreference(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Transport error carried by this error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            EngineError::Transport(e) => Some(e),
            EngineError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Errors caused by the caller's input rather than the engine or the chains
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::QuoteExpired { .. }
                | EngineError::InvalidRoute(_)
                | EngineError::ChainNotFound { .. }
                | EngineError::InvalidPreference(_)
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

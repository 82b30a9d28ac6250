//! Swap lifecycle states, observed events, and the transition rules between them

use crate::error::{EngineError, EngineResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Execution state of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Idle,
    /// Awaiting wallet signature
    Pending,
    /// Transaction sent, source receipt outstanding
    Submitted,
    /// Intermediate hop confirmed, awaiting the next
    Routing,
    Success,
    Failed,
    RolledBack,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapState::Success | SwapState::Failed | SwapState::RolledBack
        )
    }

    pub fn can_transition_to(self, next: SwapState) -> bool {
        use SwapState::*;
        matches!(
            (self, next),
            (Idle, Pending)
                | (Pending, Submitted)
                | (Pending, Failed)
                | (Submitted, Routing)
                | (Submitted, Success)
                | (Submitted, Failed)
                | (Submitted, RolledBack)
                | (Routing, Success)
                | (Routing, Failed)
                | (Routing, RolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapState::Idle => "idle",
            SwapState::Pending => "pending",
            SwapState::Submitted => "submitted",
            SwapState::Routing => "routing",
            SwapState::Success => "success",
            SwapState::Failed => "failed",
            SwapState::RolledBack => "rolled_back",
        }
    }

    /// Event status recorded when entering this state
    fn entry_status(self) -> SwapStatus {
        match self {
            SwapState::Idle | SwapState::Pending => SwapStatus::Pending,
            SwapState::Submitted => SwapStatus::Submitted,
            SwapState::Routing => SwapStatus::Routing,
            SwapState::Success => SwapStatus::Success,
            SwapState::Failed => SwapStatus::Error,
            SwapState::RolledBack => SwapStatus::RolledBack,
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by a single observed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Pending,
    Submitted,
    Routing,
    Success,
    Error,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserRejected,
    Transport,
    RetriesExhausted,
    Protocol,
    Reverted,
    Timeout,
}

/// Why a swap or hop failed, with the raw detail kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Failure detail for an engine error, classifying its category
    pub fn from_error(error: &EngineError) -> Self {
        use crate::error::TransportError;

        let kind = match error {
            EngineError::Transport(TransportError::UserRejected(_)) => FailureKind::UserRejected,
            EngineError::Transport(_) => FailureKind::Transport,
            EngineError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            EngineError::Timeout { .. } => FailureKind::Timeout,
            EngineError::EventDecoding(_) => FailureKind::Protocol,
            _ => FailureKind::Transport,
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Decoded data attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SwapFilled {
        amount_out: U256,
    },
    TokensReleased {
        recipient: Address,
        amount: U256,
    },
    SwapMismatch {
        token_in: Address,
        amount_in: U256,
        expected_token_out: Address,
        expected_amount_out: U256,
    },
    CallFailed {
        recipient_contract: Address,
        amount: U256,
    },
    Rollback {
        chain_id: u64,
        receiver: Address,
        token: Address,
        amount: U256,
    },
    Failure(FailureDetail),
}

/// A single observed lifecycle occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub status: SwapStatus,
    pub chain_id: u64,
    pub hop_index: Option<usize>,
    pub tx_hash: Option<H256>,
    pub payload: Option<EventPayload>,
    pub observed_at: DateTime<Utc>,
}

impl SwapEvent {
    pub fn new(status: SwapStatus, chain_id: u64) -> Self {
        Self {
            status,
            chain_id,
            hop_index: None,
            tx_hash: None,
            payload: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_hop(mut self, hop_index: usize) -> Self {
        self.hop_index = Some(hop_index);
        self
    }

    pub fn with_tx(mut self, tx_hash: H256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        match &self.payload {
            Some(EventPayload::Failure(detail)) => Some(detail),
            _ => None,
        }
    }
}

/// State and event sequence of one swap run.
///
/// Exactly one run owns a machine; terminal states are absorbing.
#[derive(Debug, Clone)]
pub struct SwapMachine {
    swap_id: Uuid,
    source_chain_id: u64,
    state: SwapState,
    tx_hash: Option<H256>,
    events: Vec<SwapEvent>,
}

impl SwapMachine {
    pub fn new(swap_id: Uuid, source_chain_id: u64) -> Self {
        Self {
            swap_id,
            source_chain_id,
            state: SwapState::Idle,
            tx_hash: None,
            events: Vec::new(),
        }
    }

    pub fn swap_id(&self) -> Uuid {
        self.swap_id
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn tx_hash(&self) -> Option<H256> {
        self.tx_hash
    }

    pub fn events(&self) -> &[SwapEvent] {
        &self.events
    }

    /// Move to `next`, appending the entry event.
    ///
    /// Returns `Ok(false)` without side effects once terminal, so duplicate
    /// terminal deliveries are no-ops.
    pub fn transition(&mut self, next: SwapState, payload: Option<EventPayload>) -> EngineResult<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        let mut event = SwapEvent::new(next.entry_status(), self.source_chain_id);
        event.tx_hash = self.tx_hash;
        event.payload = payload;

        self.state = next;
        self.events.push(event);
        Ok(true)
    }

    /// Enter `Submitted` with the wallet's transaction hash
    pub fn submitted(&mut self, tx_hash: H256) -> EngineResult<bool> {
        if self.state == SwapState::Pending {
            self.tx_hash = Some(tx_hash);
        }
        self.transition(SwapState::Submitted, None)
    }

    /// Enter `Failed` with the failure recorded as payload
    pub fn fail(&mut self, failure: FailureDetail) -> EngineResult<bool> {
        self.transition(SwapState::Failed, Some(EventPayload::Failure(failure)))
    }

    /// Append an observation that does not change the state
    pub fn record(&mut self, event: SwapEvent) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.events.push(event);
        true
    }

    /// Failure recorded by the terminal transition, if any
    pub fn failure(&self) -> Option<&FailureDetail> {
        if self.state != SwapState::Failed {
            return None;
        }
        self.events.iter().rev().find_map(|e| e.failure())
    }
}

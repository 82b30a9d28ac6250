//! Contract event types and parsing
//!
//! Defines the events emitted by DEX pairs, Cell routers and ICTT contracts
//! that the engine correlates with swap progress.

pub mod correlator;

pub use correlator::{EventCorrelator, Verdict};

use crate::error::{EngineError, EngineResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use serde::{Deserialize, Serialize};

/// Canonical event signatures
pub mod signatures {
    pub const SWAP: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";
    pub const CELL_SWAP_FAILED: &str = "CellSwapFailed(address,uint256,address,uint256)";
    pub const ROLLBACK: &str = "Rollback(address,address,uint256)";
    pub const CALL_FAILED: &str = "CallFailed(address,uint256)";
    pub const TOKENS_WITHDRAWN: &str = "TokensWithdrawn(address,uint256)";
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use super::signatures;
    use ethers::types::H256;
    use lazy_static::lazy_static;
    use sha3::{Digest, Keccak256};

    pub fn event_topic(signature: &str) -> H256 {
        H256::from_slice(&Keccak256::digest(signature.as_bytes()))
    }

    lazy_static! {
        pub static ref SWAP: H256 = event_topic(signatures::SWAP);
        pub static ref CELL_SWAP_FAILED: H256 = event_topic(signatures::CELL_SWAP_FAILED);
        pub static ref ROLLBACK: H256 = event_topic(signatures::ROLLBACK);
        pub static ref CALL_FAILED: H256 = event_topic(signatures::CALL_FAILED);
        pub static ref TOKENS_WITHDRAWN: H256 = event_topic(signatures::TOKENS_WITHDRAWN);
    }

    /// Topics of the events Cells and ICTT contracts emit
    pub fn lifecycle() -> Vec<H256> {
        vec![
            *CELL_SWAP_FAILED,
            *ROLLBACK,
            *CALL_FAILED,
            *TOKENS_WITHDRAWN,
        ]
    }
}

/// A decoded event relevant to swap execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellEvent {
    /// Same-chain DEX fill
    Swap {
        sender: Address,
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
        to: Address,
    },

    /// Cell could not complete the intended swap leg on arrival
    CellSwapFailed {
        token_in: Address,
        amount_in: U256,
        expected_token_out: Address,
        expected_amount_out: U256,
    },

    /// Funds for a failed leg were returned
    Rollback {
        receiver: Address,
        token: Address,
        amount: U256,
    },

    /// ICTT destination contract call reverted
    CallFailed {
        recipient_contract: Address,
        amount: U256,
    },

    /// Bridged tokens released on the destination chain
    TokensWithdrawn { recipient: Address, amount: U256 },
}

impl CellEvent {
    /// Get event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            CellEvent::Swap { .. } => "swap",
            CellEvent::CellSwapFailed { .. } => "cell_swap_failed",
            CellEvent::Rollback { .. } => "rollback",
            CellEvent::CallFailed { .. } => "call_failed",
            CellEvent::TokensWithdrawn { .. } => "tokens_withdrawn",
        }
    }

    /// Output amount of a pair swap
    pub fn swap_amount_out(&self) -> Option<U256> {
        match self {
            CellEvent::Swap {
                amount0_out,
                amount1_out,
                ..
            } => Some(std::cmp::max(*amount0_out, *amount1_out)),
            _ => None,
        }
    }
}

/// Decode a log. Unknown events return `None`; malformed known events are errors.
pub fn decode_log(log: &Log) -> EngineResult<Option<CellEvent>> {
    let Some(topic) = log.topics.first() else {
        return Ok(None);
    };

    let event = if *topic == *topics::SWAP {
        let data = decode_data(log, &vec![ParamType::Uint(256); 4])?;
        CellEvent::Swap {
            sender: indexed_address(log, 1)?,
            amount0_in: as_uint(&data[0])?,
            amount1_in: as_uint(&data[1])?,
            amount0_out: as_uint(&data[2])?,
            amount1_out: as_uint(&data[3])?,
            to: indexed_address(log, 2)?,
        }
    } else if *topic == *topics::CELL_SWAP_FAILED {
        let data = decode_data(
            log,
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Address,
                ParamType::Uint(256),
            ],
        )?;
        CellEvent::CellSwapFailed {
            token_in: as_address(&data[0])?,
            amount_in: as_uint(&data[1])?,
            expected_token_out: as_address(&data[2])?,
            expected_amount_out: as_uint(&data[3])?,
        }
    } else if *topic == *topics::ROLLBACK {
        let data = decode_data(log, &[ParamType::Uint(256)])?;
        CellEvent::Rollback {
            receiver: indexed_address(log, 1)?,
            token: indexed_address(log, 2)?,
            amount: as_uint(&data[0])?,
        }
    } else if *topic == *topics::CALL_FAILED {
        let data = decode_data(log, &[ParamType::Uint(256)])?;
        CellEvent::CallFailed {
            recipient_contract: indexed_address(log, 1)?,
            amount: as_uint(&data[0])?,
        }
    } else if *topic == *topics::TOKENS_WITHDRAWN {
        let data = decode_data(log, &[ParamType::Uint(256)])?;
        CellEvent::TokensWithdrawn {
            recipient: indexed_address(log, 1)?,
            amount: as_uint(&data[0])?,
        }
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

fn decode_data(log: &Log, params: &[ParamType]) -> EngineResult<Vec<Token>> {
    abi::decode(params, &log.data).map_err(|e| {
        EngineError::EventDecoding(format!(
            "log {:?} in tx {:?}: {}",
            log.topics.first(),
            log.transaction_hash,
            e
        ))
    })
}

fn indexed_address(log: &Log, index: usize) -> EngineResult<Address> {
    log.topics
        .get(index)
        .map(|t| Address::from_slice(&t.0[12..32]))
        .ok_or_else(|| {
            EngineError::EventDecoding(format!(
                "missing indexed topic {} in tx {:?}",
                index, log.transaction_hash
            ))
        })
}

fn as_uint(token: &Token) -> EngineResult<U256> {
    token
        .clone()
        .into_uint()
        .ok_or_else(|| EngineError::EventDecoding(format!("expected uint, got {:?}", token)))
}

fn as_address(token: &Token) -> EngineResult<Address> {
    token
        .clone()
        .into_address()
        .ok_or_else(|| EngineError::EventDecoding(format!("expected address, got {:?}", token)))
}

/// Topic encoding of an indexed address
pub fn address_topic(address: Address) -> H256 {
    H256::from(address)
}

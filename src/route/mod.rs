//! Priced route model produced by the quoting collaborator
//!
//! The engine never recomputes pricing. It checks the declared shape of a
//! quote (hop linkage, amounts, expiry) and executes it as given.

use crate::error::{EngineError, EngineResult};
use crate::transport::PreparedTransaction;

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A token on a specific chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    /// Same asset identity, ignoring display metadata
    pub fn same_as(&self, other: &Token) -> bool {
        self.chain_id == other.chain_id && self.address == other.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    /// DEX swap within one chain through an adapter
    Swap,
    /// Cross-chain transfer through a Cell and ICTT
    Bridge,
}

/// One leg of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub route_type: RouteType,
    /// Chain the hop starts on
    pub chain_id: u64,
    /// Chain the hop lands on, for bridge hops
    pub destination_chain_id: Option<u64>,
    /// Adapter (swap) or cell (bridge) executing the hop
    pub via: Address,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: U256,
    pub expected_amount_out: U256,
    pub min_amount_out: U256,
}

impl Hop {
    /// Chain on which the hop's output becomes observable
    pub fn landing_chain_id(&self) -> u64 {
        match self.route_type {
            RouteType::Swap => self.chain_id,
            RouteType::Bridge => self.destination_chain_id.unwrap_or(self.chain_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Adapter,
    Bridge,
    Relayer,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub kind: FeeKind,
    pub token: Token,
    pub amount: U256,
}

/// One candidate execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteQuote {
    pub id: Uuid,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: U256,
    pub expected_amount_out: U256,
    pub min_amount_out: U256,
    pub hops: Vec<Hop>,
    #[serde(default)]
    pub fees: Vec<Fee>,
    pub estimated_execution_ms: u64,
    pub expires_at: DateTime<Utc>,
    pub sender: Address,
    pub recipient: Address,
    pub transaction: PreparedTransaction,
}

impl RouteQuote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Reject expired quotes
    pub fn ensure_fresh(&self) -> EngineResult<()> {
        if self.is_expired() {
            return Err(EngineError::QuoteExpired {
                quote_id: self.id.to_string(),
                expired_at: self.expires_at.to_rfc3339(),
            });
        }
        Ok(())
    }

    /// Whether every hop stays on the source chain
    pub fn is_single_chain(&self) -> bool {
        self.hops
            .iter()
            .all(|h| h.route_type == RouteType::Swap && h.chain_id == self.source_chain_id)
    }

    /// Chains touched by the route, source first, in hop order
    pub fn chains_touched(&self) -> Vec<u64> {
        let mut chains = vec![self.source_chain_id];
        for hop in &self.hops {
            for id in [hop.chain_id, hop.landing_chain_id()] {
                if !chains.contains(&id) {
                    chains.push(id);
                }
            }
        }
        chains
    }

    /// Check the structural invariants of the route
    pub fn validate(&self) -> EngineResult<()> {
        let (first, last) = match (self.hops.first(), self.hops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(EngineError::InvalidRoute("route has no hops".to_string())),
        };

        if first.chain_id != self.source_chain_id || !first.token_in.same_as(&self.token_in) {
            return Err(EngineError::InvalidRoute(format!(
                "first hop does not start with {} on chain {}",
                self.token_in.symbol, self.source_chain_id
            )));
        }
        if last.landing_chain_id() != self.destination_chain_id
            || !last.token_out.same_as(&self.token_out)
        {
            return Err(EngineError::InvalidRoute(format!(
                "final hop does not deliver {} on chain {}",
                self.token_out.symbol, self.destination_chain_id
            )));
        }

        for (i, hop) in self.hops.iter().enumerate() {
            match hop.route_type {
                RouteType::Swap => {
                    if hop.destination_chain_id.is_some_and(|d| d != hop.chain_id) {
                        return Err(EngineError::InvalidRoute(format!(
                            "swap hop {} leaves chain {}",
                            i, hop.chain_id
                        )));
                    }
                }
                RouteType::Bridge => match hop.destination_chain_id {
                    Some(d) if d != hop.chain_id => {}
                    _ => {
                        return Err(EngineError::InvalidRoute(format!(
                            "bridge hop {} has no distinct destination chain",
                            i
                        )))
                    }
                },
            }

            if hop.token_in.chain_id != hop.chain_id
                || hop.token_out.chain_id != hop.landing_chain_id()
            {
                return Err(EngineError::InvalidRoute(format!(
                    "hop {} tokens are on the wrong chains",
                    i
                )));
            }

            if hop.min_amount_out > hop.expected_amount_out {
                return Err(EngineError::InvalidRoute(format!(
                    "hop {} minimum output exceeds its expected output",
                    i
                )));
            }
        }

        for (i, pair) in self.hops.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);
            if !current.token_out.same_as(&next.token_in) {
                return Err(EngineError::InvalidRoute(format!(
                    "hop {} outputs {} but hop {} takes {}",
                    i,
                    current.token_out.symbol,
                    i + 1,
                    next.token_in.symbol
                )));
            }
            if current.landing_chain_id() != next.chain_id {
                return Err(EngineError::InvalidRoute(format!(
                    "hop {} lands on chain {} but hop {} starts on chain {}",
                    i,
                    current.landing_chain_id(),
                    i + 1,
                    next.chain_id
                )));
            }
            if next.amount_in > current.expected_amount_out {
                return Err(EngineError::InvalidRoute(format!(
                    "hop {} spends more than hop {} is expected to produce",
                    i + 1,
                    i
                )));
            }
        }

        Ok(())
    }
}

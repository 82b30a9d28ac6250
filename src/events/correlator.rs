//! Maps decoded receipt logs onto hop progress for one route

use super::{decode_log, CellEvent};
use crate::chain::ChainRegistry;
use crate::route::{Hop, RouteQuote, RouteType};
use crate::swap::machine::{EventPayload, FailureDetail, FailureKind, SwapEvent, SwapStatus};

use ethers::types::{Address, TransactionReceipt, H256, U256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Overall reading of the events ingested so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    InProgress { next_hop: usize },
    Settled,
    /// A hop failed and no rollback has been seen yet
    HopFailed(FailureDetail),
    RolledBack(EventPayload),
}

impl Verdict {
    pub fn is_final(&self) -> bool {
        matches!(self, Verdict::Settled | Verdict::RolledBack(_))
    }
}

/// Tracks hop progress of a single route across receipts from any chain
#[derive(Debug)]
pub struct EventCorrelator {
    hops: Vec<Hop>,
    sender: Address,
    recipient: Address,
    /// Cells per chain touched by the route
    cells: HashMap<u64, Vec<Address>>,
    next_hop: usize,
    seen: HashSet<(u64, H256, u64)>,
    failure: Option<FailureDetail>,
    rollback: Option<EventPayload>,
}

impl EventCorrelator {
    pub fn new(quote: &RouteQuote, registry: &ChainRegistry) -> Self {
        let cells = quote
            .chains_touched()
            .into_iter()
            .filter_map(|id| registry.get_chain(id).map(|chain| (id, chain.cells.clone())))
            .collect();

        Self {
            hops: quote.hops.clone(),
            sender: quote.sender,
            recipient: quote.recipient,
            cells,
            next_hop: 0,
            seen: HashSet::new(),
            failure: None,
            rollback: None,
        }
    }

    pub fn next_hop(&self) -> usize {
        self.next_hop
    }

    pub fn current_hop(&self) -> Option<&Hop> {
        self.hops.get(self.next_hop)
    }

    pub fn is_complete(&self) -> bool {
        self.next_hop >= self.hops.len()
    }

    /// Addresses allowed to receive the output of hop `index`. The final hop
    /// pays the route recipient; earlier hops pay the next hop's contract or a
    /// Cell on the chain they land on.
    fn output_recipients(&self, index: usize) -> Vec<Address> {
        let Some(hop) = self.hops.get(index) else {
            return Vec::new();
        };
        match self.hops.get(index + 1) {
            None => vec![self.recipient],
            Some(next) => {
                let mut recipients = vec![next.via];
                if let Some(cells) = self.cells.get(&hop.landing_chain_id()) {
                    recipients.extend(cells.iter().copied());
                }
                recipients
            }
        }
    }

    /// Contracts an ICTT call for hop `index` may target
    fn call_targets(&self, index: usize) -> Vec<Address> {
        let mut targets = self.output_recipients(index);
        if let Some(cells) = self
            .hops
            .get(index)
            .and_then(|hop| self.cells.get(&hop.landing_chain_id()))
        {
            targets.extend(cells.iter().copied());
        }
        targets
    }

    /// Current verdict. A rollback always wins over a plain failure.
    pub fn verdict(&self) -> Verdict {
        if let Some(rollback) = &self.rollback {
            Verdict::RolledBack(rollback.clone())
        } else if self.is_complete() {
            Verdict::Settled
        } else if let Some(failure) = &self.failure {
            Verdict::HopFailed(failure.clone())
        } else {
            Verdict::InProgress {
                next_hop: self.next_hop,
            }
        }
    }

    /// Decode a confirmed receipt from `chain_id` and return the events it produced.
    ///
    /// Logs are evaluated in receipt order; logs already ingested are skipped.
    pub fn ingest(&mut self, chain_id: u64, receipt: &TransactionReceipt) -> Vec<SwapEvent> {
        let tx_hash = receipt.transaction_hash;
        let mut events = Vec::new();

        for (position, log) in receipt.logs.iter().enumerate() {
            let log_index = log
                .log_index
                .map(|i| i.low_u64())
                .unwrap_or(position as u64);
            if !self.seen.insert((chain_id, tx_hash, log_index)) {
                continue;
            }

            let decoded = match decode_log(log) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping malformed log on chain {}: {}", chain_id, e);
                    continue;
                }
            };

            crate::metrics::record_event(chain_id, decoded.name());

            if let Some(event) = self.apply(chain_id, tx_hash, &decoded) {
                events.push(event);
            }
        }

        events
    }

    fn apply(&mut self, chain_id: u64, tx_hash: H256, decoded: &CellEvent) -> Option<SwapEvent> {
        let hop_index = self.next_hop;

        let event = match decoded {
            CellEvent::Swap { to, .. } => {
                let hop = self.current_hop()?;
                let amount_out = decoded.swap_amount_out()?;
                if hop.route_type != RouteType::Swap
                    || hop.chain_id != chain_id
                    || amount_out.is_zero()
                    || amount_out < hop.min_amount_out
                    || !self.output_recipients(hop_index).contains(to)
                {
                    debug!(
                        "Ignoring swap log on chain {} for hop {} (out {})",
                        chain_id, hop_index, amount_out
                    );
                    return None;
                }
                self.next_hop += 1;
                SwapEvent::new(SwapStatus::Success, chain_id)
                    .with_hop(hop_index)
                    .with_payload(EventPayload::SwapFilled { amount_out })
            }

            CellEvent::TokensWithdrawn { recipient, amount } => {
                let hop = self.current_hop()?;
                if hop.route_type != RouteType::Bridge
                    || hop.landing_chain_id() != chain_id
                    || amount.is_zero()
                    || *amount < hop.min_amount_out
                    || !self.output_recipients(hop_index).contains(recipient)
                {
                    debug!(
                        "Ignoring withdrawal of {} to {:?} on chain {} for hop {}",
                        amount, recipient, chain_id, hop_index
                    );
                    return None;
                }
                self.next_hop += 1;
                SwapEvent::new(SwapStatus::Success, chain_id)
                    .with_hop(hop_index)
                    .with_payload(EventPayload::TokensReleased {
                        recipient: *recipient,
                        amount: *amount,
                    })
            }

            CellEvent::CellSwapFailed {
                token_in,
                amount_in,
                expected_token_out,
                expected_amount_out,
            } => {
                let hop = self.current_hop()?;
                if (chain_id != hop.chain_id && chain_id != hop.landing_chain_id())
                    || !carries(hop, *token_in, *amount_in)
                {
                    debug!(
                        "Ignoring cell swap failure for {} of {:?} on chain {}",
                        amount_in, token_in, chain_id
                    );
                    return None;
                }
                self.failure.get_or_insert_with(|| {
                    FailureDetail::new(
                        FailureKind::Protocol,
                        format!(
                            "cell swap failed on chain {}: {} of {:?} could not become {} of {:?}",
                            chain_id, amount_in, token_in, expected_amount_out, expected_token_out
                        ),
                    )
                });
                SwapEvent::new(SwapStatus::Error, chain_id)
                    .with_hop(hop_index)
                    .with_payload(EventPayload::SwapMismatch {
                        token_in: *token_in,
                        amount_in: *amount_in,
                        expected_token_out: *expected_token_out,
                        expected_amount_out: *expected_amount_out,
                    })
            }

            CellEvent::CallFailed {
                recipient_contract,
                amount,
            } => {
                let hop = self.current_hop()?;
                if hop.route_type != RouteType::Bridge
                    || hop.landing_chain_id() != chain_id
                    || *amount < hop.min_amount_out
                    || *amount > hop.amount_in
                    || !self.call_targets(hop_index).contains(recipient_contract)
                {
                    debug!(
                        "Ignoring failed call to {:?} on chain {} for hop {}",
                        recipient_contract, chain_id, hop_index
                    );
                    return None;
                }
                self.failure.get_or_insert_with(|| {
                    FailureDetail::new(
                        FailureKind::Protocol,
                        format!(
                            "ICTT call to {:?} on chain {} reverted ({} tokens)",
                            recipient_contract, chain_id, amount
                        ),
                    )
                });
                SwapEvent::new(SwapStatus::Error, chain_id)
                    .with_hop(hop_index)
                    .with_payload(EventPayload::CallFailed {
                        recipient_contract: *recipient_contract,
                        amount: *amount,
                    })
            }

            CellEvent::Rollback {
                receiver,
                token,
                amount,
            } => {
                if *receiver != self.sender && *receiver != self.recipient {
                    debug!("Ignoring rollback to {:?} on chain {}", receiver, chain_id);
                    return None;
                }
                let payload = EventPayload::Rollback {
                    chain_id,
                    receiver: *receiver,
                    token: *token,
                    amount: *amount,
                };
                self.rollback.get_or_insert_with(|| payload.clone());
                SwapEvent::new(SwapStatus::RolledBack, chain_id)
                    .with_hop(hop_index)
                    .with_payload(payload)
            }
        };

        Some(event.with_tx(tx_hash))
    }
}

/// Whether a failed leg moved the hop's input or its delivered output
fn carries(hop: &Hop, token: Address, amount: U256) -> bool {
    (token == hop.token_in.address && amount == hop.amount_in)
        || (token == hop.token_out.address
            && amount >= hop.min_amount_out
            && amount <= hop.expected_amount_out)
}

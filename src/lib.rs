//! Cell Swap Engine - client-side execution of multi-hop, cross-chain swaps
//!
//! Takes a priced route from the quoting service, hands its transaction to the
//! wallet, then follows the swap through Cell routers and ICTT bridges on every
//! chain it touches until it settles, rolls back, or fails.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod quote;
pub mod retry;
pub mod route;
pub mod state;
pub mod swap;
pub mod transport;

#[cfg(test)]
mod test_support;

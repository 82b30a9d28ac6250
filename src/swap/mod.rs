//! Swap execution
//!
//! - `machine`: lifecycle states and transition rules
//! - `executor`: drives one quote to a terminal state
//! - `session`: keeps at most one swap running

pub mod executor;
pub mod machine;
pub mod session;

pub use executor::{SwapExecutor, SwapNotification, SwapReport};
pub use machine::{
    EventPayload, FailureDetail, FailureKind, SwapEvent, SwapMachine, SwapState, SwapStatus,
};
pub use session::SwapSession;

//! Confirmation depth tracking
//!
//! Subnet-style chains with sub-second to few-second blocks reach practical
//! finality within a couple of seconds, so the depth is derived from the
//! average block time rather than fixed per chain id:
//! - 2s blocks: 1 confirmation
//! - 500ms blocks: 4 confirmations
//! - anything slower than the target: 1 confirmation
//!
//! A receipt counts its own block as the first confirmation.

/// Wall-clock time a block should be buried for before it is trusted
pub const CONFIRMATION_TARGET_MS: u64 = 2_000;

/// Upper bound on derived confirmation depth
pub const MAX_CONFIRMATIONS: u64 = 64;

/// Confirmation depth for a chain with the given average block time
pub fn derived_confirmations(avg_block_time_ms: u64) -> u64 {
    if avg_block_time_ms == 0 {
        return MAX_CONFIRMATIONS;
    }
    let blocks = (CONFIRMATION_TARGET_MS + avg_block_time_ms - 1) / avg_block_time_ms;
    blocks.clamp(1, MAX_CONFIRMATIONS)
}

/// Number of confirmations a block has at the given head
pub fn confirmations(block_number: u64, head: u64) -> u64 {
    if head < block_number {
        0
    } else {
        head - block_number + 1
    }
}

/// Whether a block at `block_number` is confirmed at `head`
pub fn is_confirmed(block_number: u64, head: u64, confirmation_blocks: u64) -> bool {
    confirmations(block_number, head) >= confirmation_blocks.max(1)
}

/// Highest block that is confirmed at `head`, if any
pub fn confirmed_head(head: u64, confirmation_blocks: u64) -> Option<u64> {
    (head + 1).checked_sub(confirmation_blocks.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_confirmations() {
        assert_eq!(derived_confirmations(2_000), 1);
        assert_eq!(derived_confirmations(500), 4);
        assert_eq!(derived_confirmations(12_000), 1);
        assert_eq!(derived_confirmations(1), MAX_CONFIRMATIONS);
        assert_eq!(derived_confirmations(0), MAX_CONFIRMATIONS);
    }

    #[test]
    fn test_block_counts_itself() {
        assert!(is_confirmed(100, 100, 1));
        assert!(!is_confirmed(100, 100, 2));
        assert!(is_confirmed(100, 101, 2));
        assert!(!is_confirmed(100, 99, 1));
    }

    #[test]
    fn test_confirmed_head() {
        assert_eq!(confirmed_head(100, 1), Some(100));
        assert_eq!(confirmed_head(100, 4), Some(97));
        assert_eq!(confirmed_head(2, 4), None);
    }
}

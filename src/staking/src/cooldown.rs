//! Withdrawal cooldown tracking
//!
//! One tracker lives inside each ledger account, so recording a stake and
//! the balance change it belongs to are committed under the same lock.

use nodestake_core::BlockNumber;
use serde::{Deserialize, Serialize};

/// Last-stake block of a single node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownTracker {
    last_stake_block: Option<BlockNumber>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stake at `at`
    pub fn record_stake(&mut self, at: BlockNumber) {
        self.last_stake_block = Some(at);
    }

    pub fn last_stake_block(&self) -> Option<BlockNumber> {
        self.last_stake_block
    }

    /// Whether a withdrawal at `at` is outside the cooldown window.
    ///
    /// A zero interval is always eligible. A node that never staked is
    /// eligible; a clock that reads earlier than the last stake counts as
    /// zero elapsed blocks.
    pub fn is_withdraw_eligible(&self, at: BlockNumber, cooldown_interval_blocks: BlockNumber) -> bool {
        self.blocks_remaining(at, cooldown_interval_blocks) == 0
    }

    /// Blocks left until a withdrawal becomes eligible
    pub fn blocks_remaining(&self, at: BlockNumber, cooldown_interval_blocks: BlockNumber) -> BlockNumber {
        match self.last_stake_block {
            None => 0,
            Some(last) => {
                let elapsed = at.saturating_sub(last);
                cooldown_interval_blocks.saturating_sub(elapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_staked_is_eligible() {
        let tracker = CooldownTracker::new();
        assert!(tracker.is_withdraw_eligible(0, 100));
        assert_eq!(tracker.last_stake_block(), None);
    }

    #[test]
    fn test_window_boundaries() {
        let mut tracker = CooldownTracker::new();
        tracker.record_stake(1000);

        assert!(!tracker.is_withdraw_eligible(1000, 10));
        assert!(!tracker.is_withdraw_eligible(1009, 10));
        assert_eq!(tracker.blocks_remaining(1009, 10), 1);
        assert!(tracker.is_withdraw_eligible(1010, 10));
        assert!(tracker.is_withdraw_eligible(5000, 10));
    }

    #[test]
    fn test_zero_interval_always_eligible() {
        let mut tracker = CooldownTracker::new();
        tracker.record_stake(42);
        assert!(tracker.is_withdraw_eligible(42, 0));
        assert!(tracker.is_withdraw_eligible(0, 0));
    }

    #[test]
    fn test_restake_restarts_window() {
        let mut tracker = CooldownTracker::new();
        tracker.record_stake(10);
        assert!(tracker.is_withdraw_eligible(20, 10));

        tracker.record_stake(20);
        assert!(!tracker.is_withdraw_eligible(20, 10));
        assert_eq!(tracker.last_stake_block(), Some(20));
    }

    #[test]
    fn test_clock_behind_last_stake() {
        let mut tracker = CooldownTracker::new();
        tracker.record_stake(50);
        assert!(!tracker.is_withdraw_eligible(40, 1));
        assert_eq!(tracker.blocks_remaining(40, 5), 5);
    }
}

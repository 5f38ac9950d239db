//! Block clock abstraction
//!
//! The engine reads the chain height through [`BlockClock`] so the cooldown
//! window can be driven by a real chain follower or, in tests and the
//! scenario runner, by [`ManualClock`].

use nodestake_core::BlockNumber;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of the current block number
pub trait BlockClock: Send + Sync {
    fn current_block(&self) -> BlockNumber;
}

impl<T: BlockClock + ?Sized> BlockClock for Arc<T> {
    fn current_block(&self) -> BlockNumber {
        (**self).current_block()
    }
}

/// Clock advanced explicitly by the caller
#[derive(Debug, Default)]
pub struct ManualClock {
    block: AtomicU64,
}

impl ManualClock {
    pub fn new(start: BlockNumber) -> Self {
        Self {
            block: AtomicU64::new(start),
        }
    }

    /// Mine `blocks` blocks, returning the new height.
    ///
    /// Saturates at `u64::MAX`; the clock never moves backwards.
    pub fn advance(&self, blocks: BlockNumber) -> BlockNumber {
        let previous = self
            .block
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| Some(b.saturating_add(blocks)))
            .unwrap_or_else(|b| b);
        previous.saturating_add(blocks)
    }

    /// Mine `blocks` blocks unless the height would overflow
    pub fn try_advance(&self, blocks: BlockNumber) -> Option<BlockNumber> {
        self.block
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_add(blocks))
            .ok()
            .map(|previous| previous + blocks)
    }

    pub fn set(&self, block: BlockNumber) {
        self.block.store(block, Ordering::SeqCst);
    }
}

impl BlockClock for ManualClock {
    fn current_block(&self) -> BlockNumber {
        self.block.load(Ordering::SeqCst)
    }
}

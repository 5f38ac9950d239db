//! Shared types for the staking workspace

pub mod address;
pub mod units;

pub use address::Address;

/// Node identifier: the operator account that registered the node
pub type NodeId = Address;

/// Token amount in the smallest unit (wei, 18 decimals)
pub type Amount = u128;

/// Chain block height used as the protocol clock
pub type BlockNumber = u64;

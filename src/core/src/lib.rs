//! # NodeStake Core
//!
//! Shared value types for the node staking workspace: account addresses,
//! token amounts in wei precision, block numbers and unit conversion.

pub mod types;
pub mod error;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use types::{units, Address, Amount, BlockNumber, NodeId};

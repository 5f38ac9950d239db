//! Common types for node staking

use chrono::{DateTime, Utc};
use nodestake_core::{units, Amount, BlockNumber, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of a balance change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StakeDirection {
    Stake,
    Withdraw,
}

/// Append-only ledger entry for one accepted balance change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeRecord {
    /// Unique record ID
    pub id: Uuid,

    /// Node whose balance changed
    pub node: NodeId,

    /// Amount moved
    #[serde(with = "units::amount_string")]
    pub amount: Amount,

    /// Stake or withdraw
    pub direction: StakeDirection,

    /// Block at which the change was applied
    pub block: BlockNumber,

    /// Balance immediately after the change
    #[serde(with = "units::amount_string")]
    pub balance_after: Amount,

    /// Wall-clock time the record was written
    pub recorded_at: DateTime<Utc>,
}

/// Registration status of a node entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    /// Registered and able to stake
    Active,

    /// Deregistered; history retained, may register again
    Deregistered,
}

/// Derived staking state of a node.
///
/// `CooldownActive` is never stored: it is `Staked` viewed at a block
/// inside the withdrawal cooldown window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Unstaked,
    Staked,
    CooldownActive { remaining_blocks: BlockNumber },
}

/// Operation an event or rejection refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterNode,
    CreateNodeContract,
    DeregisterNode,
    MinipoolCountChange,
    Stake,
    Withdraw,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::RegisterNode => "register_node",
            Operation::CreateNodeContract => "create_node_contract",
            Operation::DeregisterNode => "deregister_node",
            Operation::MinipoolCountChange => "minipool_count_change",
            Operation::Stake => "stake",
            Operation::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an accepted stake or withdraw request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakeReceipt {
    pub node: NodeId,

    #[serde(with = "units::amount_string")]
    pub amount: Amount,

    #[serde(with = "units::amount_string")]
    pub new_balance: Amount,

    pub block: BlockNumber,

    /// ID of the ledger record written for this change
    pub record_id: Uuid,
}

/// Engine-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingStatistics {
    /// Total amount currently staked
    #[serde(with = "units::amount_string")]
    pub total_staked: Amount,

    /// Nodes currently registered
    pub active_nodes: usize,

    /// Nodes with a non-zero balance
    pub staked_nodes: usize,

    /// Active minipools across all nodes
    pub active_minipools: u64,

    /// Ledger records across all nodes
    pub total_records: usize,
}

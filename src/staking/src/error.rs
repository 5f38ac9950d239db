//! Error types for the staking engine

use nodestake_core::{Address, Amount, BlockNumber, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Staking engine errors.
///
/// Every rejected request maps to exactly one variant, and a rejected
/// request never leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    #[error("Caller {caller} is not authorized to act for node {node}")]
    Unauthorized { caller: Address, node: NodeId },

    #[error("Invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Amount },

    #[error("Insufficient stake: available {available}, requested {requested}")]
    InsufficientStake { available: Amount, requested: Amount },

    #[error("Withdrawal cooldown active: {remaining_blocks} of {cooldown_blocks} blocks remaining")]
    WithdrawCooldownActive {
        last_stake_block: BlockNumber,
        current_block: BlockNumber,
        cooldown_blocks: BlockNumber,
        remaining_blocks: BlockNumber,
    },

    #[error("Withdrawal would leave node undercollateralized: balance {balance}, requested {requested}, required {required}")]
    UndercollateralizedWithdraw { balance: Amount, requested: Amount, required: Amount },

    #[error("Arithmetic overflow in {operation}")]
    ArithmeticOverflow { operation: &'static str },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node already registered: {0}")]
    NodeAlreadyRegistered(NodeId),

    #[error("Node {node} already has node contract {contract}")]
    NodeContractExists { node: NodeId, contract: Address },

    #[error("Node {node} still active: balance {balance}, active minipools {active_minipools}")]
    NodeStillActive { node: NodeId, balance: Amount, active_minipools: u64 },

    #[error("Minipool count underflow for node {node}: {active} active, delta {delta}")]
    MinipoolCountUnderflow { node: NodeId, active: u64, delta: i64 },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Invalid ledger snapshot: {0}")]
    InvalidSnapshot(String),
}

impl StakingError {
    /// The failure kind, without context fields
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakingError::Unauthorized { .. } => ErrorKind::Unauthorized,
            StakingError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            StakingError::InsufficientStake { .. } => ErrorKind::InsufficientStake,
            StakingError::WithdrawCooldownActive { .. } => ErrorKind::WithdrawCooldownActive,
            StakingError::UndercollateralizedWithdraw { .. } => ErrorKind::UndercollateralizedWithdraw,
            StakingError::ArithmeticOverflow { .. } => ErrorKind::ArithmeticOverflow,
            StakingError::UnknownNode(_) => ErrorKind::UnknownNode,
            StakingError::NodeAlreadyRegistered(_) => ErrorKind::NodeAlreadyRegistered,
            StakingError::NodeContractExists { .. } => ErrorKind::NodeContractExists,
            StakingError::NodeStillActive { .. } => ErrorKind::NodeStillActive,
            StakingError::MinipoolCountUnderflow { .. } => ErrorKind::MinipoolCountUnderflow,
            StakingError::InvalidSetting { .. } => ErrorKind::InvalidSetting,
            StakingError::InvalidSnapshot(_) => ErrorKind::InvalidSnapshot,
        }
    }

    pub(crate) fn overflow(operation: &'static str) -> Self {
        StakingError::ArithmeticOverflow { operation }
    }

    pub(crate) fn invalid_setting<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        StakingError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure kind carried by rejection events and metrics labels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    InvalidAmount,
    InsufficientStake,
    WithdrawCooldownActive,
    UndercollateralizedWithdraw,
    ArithmeticOverflow,
    UnknownNode,
    NodeAlreadyRegistered,
    NodeContractExists,
    NodeStillActive,
    MinipoolCountUnderflow,
    InvalidSetting,
    InvalidSnapshot,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Unauthorized,
        ErrorKind::InvalidAmount,
        ErrorKind::InsufficientStake,
        ErrorKind::WithdrawCooldownActive,
        ErrorKind::UndercollateralizedWithdraw,
        ErrorKind::ArithmeticOverflow,
        ErrorKind::UnknownNode,
        ErrorKind::NodeAlreadyRegistered,
        ErrorKind::NodeContractExists,
        ErrorKind::NodeStillActive,
        ErrorKind::MinipoolCountUnderflow,
        ErrorKind::InvalidSetting,
        ErrorKind::InvalidSnapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::InvalidAmount => "InvalidAmount",
            ErrorKind::InsufficientStake => "InsufficientStake",
            ErrorKind::WithdrawCooldownActive => "WithdrawCooldownActive",
            ErrorKind::UndercollateralizedWithdraw => "UndercollateralizedWithdraw",
            ErrorKind::ArithmeticOverflow => "ArithmeticOverflow",
            ErrorKind::UnknownNode => "UnknownNode",
            ErrorKind::NodeAlreadyRegistered => "NodeAlreadyRegistered",
            ErrorKind::NodeContractExists => "NodeContractExists",
            ErrorKind::NodeStillActive => "NodeStillActive",
            ErrorKind::MinipoolCountUnderflow => "MinipoolCountUnderflow",
            ErrorKind::InvalidSetting => "InvalidSetting",
            ErrorKind::InvalidSnapshot => "InvalidSnapshot",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown error kind: {}", s))
    }
}

pub type Result<T> = std::result::Result<T, StakingError>;

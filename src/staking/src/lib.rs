//! Node staking and withdrawal engine
//!
//! Tracks each node's staked balance and enforces the rules around it:
//! - **Authorization**: only the node operator or its node contract may move stake
//! - **Cooldown**: withdrawals wait a configurable number of blocks after the last stake
//! - **Collateralization**: a node keeps enough stake for its active minipools
//! - **Atomicity**: a rejected request leaves balances, cooldowns and records untouched
//!
//! ## Components
//!
//! [`Ledger`] stores balances and the append-only record log,
//! [`CooldownTracker`] computes withdrawal eligibility,
//! [`CollateralEvaluator`] computes the collateral floor and
//! [`StakingEngine`] runs requests against all three.

pub mod clock;
pub mod collateral;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod settings;
pub mod types;

pub use clock::{BlockClock, ManualClock};
pub use collateral::CollateralEvaluator;
pub use cooldown::CooldownTracker;
pub use engine::{EngineSnapshot, StakingEngine};
pub use error::{ErrorKind, Result, StakingError};
pub use events::{EventBus, StakingEvent};
pub use ledger::{Ledger, LedgerTotals, NodeAccount};
pub use metrics::{
    StakingMetrics, register_metrics, get_registry,
    record_stake, record_withdrawal, record_rejection,
    update_stake_totals, update_node_minipools,
};
pub use settings::{ProtocolSettings, SettingsSnapshot, SettingsStore, RATIO_SCALE};
pub use types::{
    NodeState, NodeStatus, Operation, StakeDirection, StakeReceipt, StakeRecord,
    StakingStatistics,
};

pub use nodestake_core::{units, Address, Amount, BlockNumber, NodeId};

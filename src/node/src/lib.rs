//! NodeStake operator node
//!
//! Runs the staking engine behind a CLI: TOML configuration, scenario
//! replay against a manual block clock, and JSON state persistence.

pub mod config;
pub mod node;
pub mod scenario;
pub mod state;

pub use config::NodeConfig;
pub use node::StakeNode;
pub use scenario::{Scenario, ScenarioError, ScenarioReport, ScenarioRunner};

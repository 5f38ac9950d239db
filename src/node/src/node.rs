//! Staking node runtime
//!
//! Wires the staking engine to its settings store, a manual block clock,
//! optional Prometheus metrics and the JSON state file.

use anyhow::{Context, Result};
use nodestake_staking::{
    get_registry, register_metrics, BlockClock, ManualClock, SettingsStore, StakingEngine,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::info;

use crate::config::NodeConfig;
use crate::scenario::{Scenario, ScenarioReport, ScenarioRunner};
use crate::state;

pub struct StakeNode {
    config: NodeConfig,
    engine: StakingEngine,
    clock: Arc<ManualClock>,
}

impl StakeNode {
    /// Build the engine and restore saved state, if any
    pub fn new(config: NodeConfig) -> Result<Self> {
        let settings = Arc::new(
            SettingsStore::new(config.settings).context("Failed to initialize protocol settings")?,
        );
        let clock = Arc::new(ManualClock::new(0));
        let mut engine = StakingEngine::new(settings, clock.clone());

        if config.metrics.enabled {
            let metrics = register_metrics().context("Failed to register metrics")?;
            engine = engine.with_metrics(metrics);
        }

        if let Some(path) = &config.state.path {
            if let Some(snapshot) = state::load_snapshot(path)? {
                clock.set(snapshot.block);
                engine
                    .restore(snapshot)
                    .with_context(|| format!("Failed to restore state from {:?}", path))?;
                info!("Restored state from {:?}", path);
            }
        }

        Ok(Self { config, engine, clock })
    }

    pub fn engine(&self) -> &StakingEngine {
        &self.engine
    }

    /// Replay a scenario, starting no earlier than the restored block
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        let mut scenario = scenario.clone();
        scenario.start_block = scenario.start_block.max(self.clock.current_block());

        let report = ScenarioRunner::new(&self.engine, &self.clock).run(&scenario)?;
        Ok(report)
    }

    /// Save state if a state path is configured
    pub fn persist(&self) -> Result<()> {
        match &self.config.state.path {
            Some(path) if self.config.state.save_on_exit => {
                state::save_snapshot(path, &self.engine.snapshot())?;
                info!("Saved state to {:?}", path);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Prometheus text exposition of the global registry
    pub fn metrics_text(&self) -> Result<Option<String>> {
        let Some(registry) = get_registry() else {
            return Ok(None);
        };

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        Ok(Some(String::from_utf8(buffer).context("Metrics are not UTF-8")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateSection;
    use nodestake_core::Address;

    const SCRIPT: &str = r#"
        [settings]
        cooldown_interval_blocks = 0

        [[steps]]
        action = "register"
        node = "node"
        expect_error = "NodeAlreadyRegistered"

        [[steps]]
        action = "stake"
        node = "node"
        amount = "5 rpl"
    "#;

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            state: StateSection {
                path: Some(dir.path().join("state.json")),
                save_on_exit: true,
            },
            ..NodeConfig::default()
        };

        let node = Address::from_label("node");
        let first = StakeNode::new(config.clone()).unwrap();
        first.engine().register_node(node).unwrap();
        first.run_scenario(&Scenario::from_toml(SCRIPT).unwrap()).unwrap();
        first.persist().unwrap();

        let second = StakeNode::new(config).unwrap();
        assert_eq!(second.engine().balance_of(&node), 5_000_000_000_000_000_000);

        let report = second.run_scenario(&Scenario::from_toml(SCRIPT).unwrap()).unwrap();
        assert_eq!(report.expected_failures, 1);
        assert_eq!(second.engine().balance_of(&node), 10_000_000_000_000_000_000);
    }

    #[test]
    fn test_no_state_path_is_a_noop() {
        let node = StakeNode::new(NodeConfig::default()).unwrap();
        node.persist().unwrap();
    }
}

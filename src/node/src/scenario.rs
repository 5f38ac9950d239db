//! Scenario scripts
//!
//! A scenario is a TOML file with an optional `[settings]` table and a list
//! of `[[steps]]`. Accounts are written as labels (`"node"`, `"random"`) that
//! map to deterministic addresses, or as `0x` hex addresses. Amounts are
//! strings in any form `units::parse_amount` accepts (`"10 rpl"`,
//! `"0.5 ether"`, `"1000 wei"`).
//!
//! ```toml
//! start_block = 1
//!
//! [[steps]]
//! action = "register"
//! node = "node"
//!
//! [[steps]]
//! action = "stake"
//! node = "node"
//! amount = "10 rpl"
//!
//! [[steps]]
//! action = "withdraw"
//! node = "node"
//! amount = "10 rpl"
//! expect_error = "WithdrawCooldownActive"
//! ```

use nodestake_core::{units, Address, Amount, BlockNumber};
use nodestake_staking::{
    BlockClock, ErrorKind, ManualClock, ProtocolSettings, StakingEngine, StakingError, StakingEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Parsed scenario file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    /// Block the clock starts at
    #[serde(default = "default_start_block")]
    pub start_block: BlockNumber,

    /// Settings for this scenario, replacing the configured ones
    #[serde(default)]
    pub settings: Option<ProtocolSettings>,

    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

fn default_start_block() -> BlockNumber { 1 }

/// One step plus its optional expected failure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioStep {
    #[serde(flatten)]
    pub action: StepAction,

    #[serde(default)]
    pub expect_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StepAction {
    Register {
        node: String,
    },
    CreateNodeContract {
        node: String,
        #[serde(default)]
        caller: Option<String>,
        /// Label the created contract can be referred to by
        #[serde(default)]
        alias: Option<String>,
    },
    Stake {
        node: String,
        amount: String,
        #[serde(default)]
        caller: Option<String>,
    },
    Withdraw {
        node: String,
        amount: String,
        #[serde(default)]
        caller: Option<String>,
    },
    Minipools {
        node: String,
        delta: i64,
    },
    SetSetting {
        key: String,
        value: toml::Value,
    },
    Mine {
        blocks: BlockNumber,
    },
    Deregister {
        node: String,
        #[serde(default)]
        caller: Option<String>,
    },
    ExpectBalance {
        node: String,
        amount: String,
    },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Register { .. } => "register",
            StepAction::CreateNodeContract { .. } => "create-node-contract",
            StepAction::Stake { .. } => "stake",
            StepAction::Withdraw { .. } => "withdraw",
            StepAction::Minipools { .. } => "minipools",
            StepAction::SetSetting { .. } => "set-setting",
            StepAction::Mine { .. } => "mine",
            StepAction::Deregister { .. } => "deregister",
            StepAction::ExpectBalance { .. } => "expect-balance",
        }
    }
}

/// Scenario failures; `step` is the 1-based step number
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("step {step} ({action}): {reason}")]
    InvalidStep {
        step: usize,
        action: &'static str,
        reason: String,
    },

    #[error("step {step} ({action}) failed unexpectedly: {error}")]
    UnexpectedError {
        step: usize,
        action: &'static str,
        error: StakingError,
    },

    #[error("step {step} ({action}) succeeded, expected {expected}")]
    MissingError {
        step: usize,
        action: &'static str,
        expected: ErrorKind,
    },

    #[error("step {step} ({action}) failed with {actual}, expected {expected}")]
    WrongError {
        step: usize,
        action: &'static str,
        expected: ErrorKind,
        actual: ErrorKind,
    },

    #[error("step {step}: balance of {node} is {actual}, expected {expected}")]
    BalanceMismatch {
        step: usize,
        node: Address,
        expected: String,
        actual: String,
    },
}

impl Scenario {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(contents)?)
    }
}

/// Result of a completed scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: Option<String>,
    pub steps_run: usize,
    pub expected_failures: usize,
    pub final_block: BlockNumber,
    pub events: Vec<StakingEvent>,
}

/// Replays scenario steps against an engine driven by a manual clock
pub struct ScenarioRunner<'a> {
    engine: &'a StakingEngine,
    clock: &'a ManualClock,
    aliases: HashMap<String, Address>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(engine: &'a StakingEngine, clock: &'a ManualClock) -> Self {
        Self {
            engine,
            clock,
            aliases: HashMap::new(),
        }
    }

    /// Resolve an account label, alias or hex address
    pub fn resolve(&self, account: &str) -> Address {
        if let Some(address) = self.aliases.get(account) {
            return *address;
        }
        account
            .parse()
            .unwrap_or_else(|_| Address::from_label(account))
    }

    /// Run every step, stopping at the first unmet expectation
    pub fn run(&mut self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        self.clock.set(scenario.start_block);
        let mut events = self.engine.subscribe();
        let mut collected = Vec::new();
        let mut expected_failures = 0;

        if let Some(settings) = scenario.settings {
            self.engine
                .settings()
                .update(|current| {
                    *current = settings;
                    Ok(())
                })
                .map_err(|error| ScenarioError::UnexpectedError {
                    step: 0,
                    action: "settings",
                    error,
                })?;
        }

        info!(
            name = scenario.name.as_deref().unwrap_or("unnamed"),
            steps = scenario.steps.len(),
            "Running scenario"
        );

        for (index, step) in scenario.steps.iter().enumerate() {
            let number = index + 1;
            let action = step.action.name();
            let outcome = self.apply(number, &step.action)?;

            match (outcome, step.expect_error) {
                (Ok(()), None) => {}
                (Ok(()), Some(expected)) => {
                    return Err(ScenarioError::MissingError { step: number, action, expected });
                }
                (Err(error), None) => {
                    return Err(ScenarioError::UnexpectedError { step: number, action, error });
                }
                (Err(error), Some(expected)) if error.kind() == expected => {
                    debug!(step = number, action, kind = %expected, "Expected failure");
                    expected_failures += 1;
                }
                (Err(error), Some(expected)) => {
                    return Err(ScenarioError::WrongError {
                        step: number,
                        action,
                        expected,
                        actual: error.kind(),
                    });
                }
            }

            drain(&mut events, &mut collected);
        }

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            steps_run: scenario.steps.len(),
            expected_failures,
            final_block: self.clock.current_block(),
            events: collected,
        })
    }

    /// Apply one step; the inner result is the engine's verdict
    fn apply(&mut self, step: usize, action: &StepAction) -> Result<Result<(), StakingError>, ScenarioError> {
        let name = action.name();
        let amount = |raw: &str| {
            units::parse_amount(raw).map_err(|e| ScenarioError::InvalidStep {
                step,
                action: name,
                reason: e.to_string(),
            })
        };

        let outcome = match action {
            StepAction::Register { node } => {
                self.engine.register_node(self.resolve(node)).map(|_| ())
            }
            StepAction::CreateNodeContract { node, caller, alias } => {
                let node = self.resolve(node);
                let caller = self.caller_or(caller, node);
                self.engine.create_node_contract(caller, node).map(|contract| {
                    if let Some(alias) = alias {
                        self.aliases.insert(alias.clone(), contract);
                    }
                })
            }
            StepAction::Stake { node, amount: raw, caller } => {
                let node = self.resolve(node);
                let caller = self.caller_or(caller, node);
                self.engine.request_stake(caller, node, amount(raw)?).map(|_| ())
            }
            StepAction::Withdraw { node, amount: raw, caller } => {
                let node = self.resolve(node);
                let caller = self.caller_or(caller, node);
                self.engine.request_withdraw(caller, node, amount(raw)?).map(|_| ())
            }
            StepAction::Minipools { node, delta } => self
                .engine
                .report_minipool_count_change(self.resolve(node), *delta)
                .map(|_| ()),
            StepAction::SetSetting { key, value } => {
                let value = setting_value(value).ok_or_else(|| ScenarioError::InvalidStep {
                    step,
                    action: name,
                    reason: format!("unsupported value for {}: {}", key, value),
                })?;
                self.engine.settings().set(key, &value).map(|_| ())
            }
            StepAction::Mine { blocks } => {
                let block = self.clock.try_advance(*blocks).ok_or_else(|| ScenarioError::InvalidStep {
                    step,
                    action: name,
                    reason: format!(
                        "mining {} blocks from {} overflows the block height",
                        blocks,
                        self.clock.current_block()
                    ),
                })?;
                debug!(blocks, block, "Mined blocks");
                Ok(())
            }
            StepAction::Deregister { node, caller } => {
                let node = self.resolve(node);
                let caller = self.caller_or(caller, node);
                self.engine.deregister_node(caller, node)
            }
            StepAction::ExpectBalance { node, amount: raw } => {
                let node = self.resolve(node);
                let expected: Amount = amount(raw)?;
                let actual = self.engine.balance_of(&node);
                if actual != expected {
                    return Err(ScenarioError::BalanceMismatch {
                        step,
                        node,
                        expected: units::format_ether(expected),
                        actual: units::format_ether(actual),
                    });
                }
                Ok(())
            }
        };

        Ok(outcome)
    }

    fn caller_or(&self, caller: &Option<String>, node: Address) -> Address {
        caller.as_deref().map_or(node, |c| self.resolve(c))
    }
}

fn setting_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

fn drain(events: &mut broadcast::Receiver<StakingEvent>, collected: &mut Vec<StakingEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => collected.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Event subscriber lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodestake_staking::SettingsStore;
    use std::sync::Arc;

    fn engine() -> (StakingEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1));
        let engine = StakingEngine::new(Arc::new(SettingsStore::default()), clock.clone());
        (engine, clock)
    }

    fn run(script: &str) -> Result<ScenarioReport, ScenarioError> {
        let (engine, clock) = engine();
        let scenario = Scenario::from_toml(script).unwrap();
        ScenarioRunner::new(&engine, &clock).run(&scenario)
    }

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_toml(
            r#"
            name = "parse"

            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "set-setting"
            key = "RewardsClaimIntervalBlocks"
            value = 0

            [[steps]]
            action = "withdraw"
            caller = "random"
            node = "node"
            amount = "1 rpl"
            expect_error = "Unauthorized"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.start_block, 1);
        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(scenario.steps[1].action, StepAction::SetSetting { .. }));
        assert_eq!(scenario.steps[2].expect_error, Some(ErrorKind::Unauthorized));
    }

    #[test]
    fn test_cooldown_scenario() {
        let report = run(
            r#"
            [settings]
            cooldown_interval_blocks = 10

            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "stake"
            node = "node"
            amount = "10 rpl"

            [[steps]]
            action = "withdraw"
            node = "node"
            amount = "10 rpl"
            expect_error = "WithdrawCooldownActive"

            [[steps]]
            action = "mine"
            blocks = 10

            [[steps]]
            action = "withdraw"
            node = "node"
            amount = "4 rpl"

            [[steps]]
            action = "expect-balance"
            node = "node"
            amount = "6 rpl"
            "#,
        )
        .unwrap();

        assert_eq!(report.steps_run, 6);
        assert_eq!(report.expected_failures, 1);
        assert_eq!(report.final_block, 11);
        assert_eq!(report.events.iter().filter(|e| e.is_rejection()).count(), 1);
    }

    #[test]
    fn test_node_contract_alias() {
        let report = run(
            r#"
            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "create-node-contract"
            node = "node"
            alias = "contract"

            [[steps]]
            action = "stake"
            caller = "contract"
            node = "node"
            amount = "2 rpl"

            [[steps]]
            action = "expect-balance"
            node = "node"
            amount = "2 rpl"
            "#,
        );
        assert!(report.is_ok());
    }

    #[test]
    fn test_unmet_expectations() {
        let err = run(
            r#"
            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "stake"
            node = "node"
            amount = "1 rpl"
            expect_error = "Unauthorized"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::MissingError { step: 2, .. }));

        let err = run(
            r#"
            [[steps]]
            action = "stake"
            node = "node"
            amount = "1 rpl"
            expect_error = "Unauthorized"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::WrongError { actual: ErrorKind::UnknownNode, expected: ErrorKind::Unauthorized, .. }
        ));

        let err = run(
            r#"
            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "expect-balance"
            node = "node"
            amount = "1 rpl"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::BalanceMismatch { step: 2, .. }));
    }

    #[test]
    fn test_invalid_amount() {
        let err = run(
            r#"
            [[steps]]
            action = "register"
            node = "node"

            [[steps]]
            action = "stake"
            node = "node"
            amount = "ten"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidStep { step: 2, action: "stake", .. }));
    }

    #[test]
    fn test_mine_past_max_height_is_rejected() {
        let (engine, clock) = engine();
        let scenario = Scenario::from_toml(
            r#"
            start_block = 9223372036854775807

            [[steps]]
            action = "mine"
            blocks = 9223372036854775807

            [[steps]]
            action = "mine"
            blocks = 2
            "#,
        )
        .unwrap();

        let err = ScenarioRunner::new(&engine, &clock).run(&scenario).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidStep { step: 2, action: "mine", .. }));
        assert_eq!(clock.current_block(), u64::MAX - 1);
    }

    #[test]
    fn test_resolve_hex_and_labels() {
        let (engine, clock) = engine();
        let runner = ScenarioRunner::new(&engine, &clock);
        let node = Address::from_label("node");

        assert_eq!(runner.resolve("node"), node);
        assert_eq!(runner.resolve(&node.to_hex()), node);
    }
}

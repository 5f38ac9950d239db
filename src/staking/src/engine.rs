//! Staking engine
//!
//! Orchestrates stake and withdraw requests from the minipool/registration
//! subsystem against the ledger, the per-node cooldown tracker and the
//! collateral evaluator.
//!
//! Check order for a withdrawal:
//! 1. the node exists and is registered
//! 2. the caller is the operator or its node contract
//! 3. the amount is non-zero
//! 4. the cooldown window has elapsed
//! 5. the balance covers the amount
//! 6. the remaining balance covers the collateral floor
//!
//! All checks and the mutation run under the node's ledger entry lock, with
//! settings and the block number read inside that lock. A rejected request
//! changes nothing.

use nodestake_core::{Address, Amount, BlockNumber, NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::BlockClock;
use crate::collateral::CollateralEvaluator;
use crate::error::{Result, StakingError};
use crate::events::{EventBus, StakingEvent};
use crate::ledger::{Ledger, NodeAccount};
use crate::metrics::{self, StakingMetrics};
use crate::settings::SettingsStore;
use crate::types::{NodeState, Operation, StakeReceipt, StakeRecord, StakingStatistics};

/// Serializable copy of the engine's ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Block the snapshot was taken at
    pub block: BlockNumber,

    /// Settings version in force when the snapshot was taken
    pub settings_version: u64,

    pub accounts: Vec<NodeAccount>,
}

/// Node staking and withdrawal engine
pub struct StakingEngine {
    ledger: Ledger,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn BlockClock>,
    events: EventBus,
    metrics: Option<Arc<StakingMetrics>>,
}

impl StakingEngine {
    /// Create an engine reading settings from `settings` and time from `clock`
    pub fn new(settings: Arc<SettingsStore>, clock: Arc<dyn BlockClock>) -> Self {
        Self {
            ledger: Ledger::new(),
            settings,
            clock,
            events: EventBus::default(),
            metrics: None,
        }
    }

    /// Attach Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<StakingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the event bus with one of the given capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventBus::new(capacity);
        self
    }

    /// Subscribe to outbound events
    pub fn subscribe(&self) -> broadcast::Receiver<StakingEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn current_block(&self) -> BlockNumber {
        self.clock.current_block()
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Register `operator` as a node (or reactivate a deregistered one)
    pub fn register_node(&self, operator: Address) -> Result<NodeId> {
        let block = self.clock.current_block();
        if let Err(err) = self.ledger.register(operator, block) {
            return Err(self.reject(Operation::RegisterNode, operator, Some(operator), Some(block), err));
        }

        info!(node = %operator, block, "Node registered");
        self.events.publish(StakingEvent::NodeRegistered { node: operator, block });
        self.refresh_totals();
        Ok(operator)
    }

    /// Create the node's delegated contract; only the operator may do this
    pub fn create_node_contract(&self, caller: Address, node: NodeId) -> Result<Address> {
        let block = self.clock.current_block();
        let outcome = self.ledger.with_account(&node, |account| {
            if caller != account.operator() {
                return Err(StakingError::Unauthorized { caller, node });
            }
            account.create_node_contract()
        });

        match outcome {
            Ok(contract) => {
                info!(node = %node, contract = %contract, "Node contract created");
                self.events.publish(StakingEvent::NodeContractCreated { node, contract, block });
                Ok(contract)
            }
            Err(err) => Err(self.reject(Operation::CreateNodeContract, node, Some(caller), Some(block), err)),
        }
    }

    /// Deregister a node with no stake and no active minipools.
    ///
    /// The entry and its records are kept.
    pub fn deregister_node(&self, caller: Address, node: NodeId) -> Result<()> {
        let block = self.clock.current_block();
        let outcome = self.ledger.with_account(&node, |account| {
            if caller != account.operator() {
                return Err(StakingError::Unauthorized { caller, node });
            }
            account.deregister()
        });

        match outcome {
            Ok(()) => {
                info!(node = %node, block, "Node deregistered");
                self.events.publish(StakingEvent::NodeDeregistered { node, block });
                self.refresh_totals();
                Ok(())
            }
            Err(err) => Err(self.reject(Operation::DeregisterNode, node, Some(caller), Some(block), err)),
        }
    }

    /// Apply a minipool count change reported by the minipool subsystem
    pub fn report_minipool_count_change(&self, node: NodeId, delta: i64) -> Result<u64> {
        let block = self.clock.current_block();
        match self.ledger.with_account(&node, |account| account.adjust_minipools(delta)) {
            Ok(active_minipools) => {
                debug!(node = %node, delta, active_minipools, "Minipool count changed");
                self.events.publish(StakingEvent::MinipoolCountChanged {
                    node,
                    delta,
                    active_minipools,
                    block,
                });
                if let Some(m) = &self.metrics {
                    metrics::update_node_minipools(m, &node.to_hex(), active_minipools);
                }
                Ok(active_minipools)
            }
            Err(err) => Err(self.reject(Operation::MinipoolCountChange, node, None, Some(block), err)),
        }
    }

    // ------------------------------------------------------------------
    // Stake / withdraw
    // ------------------------------------------------------------------

    /// Stake `amount` for `node` on behalf of `caller`
    pub fn request_stake(&self, caller: Address, node: NodeId, amount: Amount) -> Result<StakeReceipt> {
        let mut decided_at = None;
        let outcome = self.ledger.with_account(&node, |account| {
            let block = self.clock.current_block();
            decided_at = Some(block);
            authorize(account, &caller)?;

            let record = account.stake(amount, block)?;
            let receipt = StakeReceipt {
                node,
                amount,
                new_balance: record.balance_after,
                block,
                record_id: record.id,
            };

            // Published under the entry lock so events follow ledger order
            self.events.publish(StakingEvent::StakeAccepted {
                node,
                amount,
                new_balance: receipt.new_balance,
                block,
            });
            if let Some(m) = &self.metrics {
                metrics::record_stake(m, &node.to_hex(), amount, receipt.new_balance);
            }
            Ok(receipt)
        });

        match outcome {
            Ok(receipt) => {
                info!(
                    node = %node,
                    amount = %receipt.amount,
                    new_balance = %receipt.new_balance,
                    block = receipt.block,
                    "Stake accepted"
                );
                self.refresh_totals();
                Ok(receipt)
            }
            Err(err) => Err(self.reject(Operation::Stake, node, Some(caller), decided_at, err)),
        }
    }

    /// Withdraw `amount` of `node`'s stake on behalf of `caller`
    pub fn request_withdraw(&self, caller: Address, node: NodeId, amount: Amount) -> Result<StakeReceipt> {
        let mut decided_at = None;
        let outcome = self.ledger.with_account(&node, |account| {
            let block = self.clock.current_block();
            decided_at = Some(block);
            authorize(account, &caller)?;

            if amount == 0 {
                return Err(StakingError::InvalidAmount { amount });
            }

            let settings = self.settings.snapshot().settings;

            let cooldown = account.cooldown();
            let remaining_blocks = cooldown.blocks_remaining(block, settings.cooldown_interval_blocks);
            if remaining_blocks > 0 {
                return Err(StakingError::WithdrawCooldownActive {
                    last_stake_block: cooldown.last_stake_block().unwrap_or_default(),
                    current_block: block,
                    cooldown_blocks: settings.cooldown_interval_blocks,
                    remaining_blocks,
                });
            }

            let balance = account.staked_balance();
            if amount > balance {
                return Err(StakingError::InsufficientStake {
                    available: balance,
                    requested: amount,
                });
            }

            let evaluator = CollateralEvaluator::new(&settings);
            if !evaluator.can_withdraw(balance, amount, account.active_minipools())? {
                return Err(StakingError::UndercollateralizedWithdraw {
                    balance,
                    requested: amount,
                    required: evaluator.required_collateral(account.active_minipools())?,
                });
            }

            let record = account.withdraw(amount, block)?;
            let receipt = StakeReceipt {
                node,
                amount,
                new_balance: record.balance_after,
                block,
                record_id: record.id,
            };

            self.events.publish(StakingEvent::WithdrawAccepted {
                node,
                amount,
                new_balance: receipt.new_balance,
                block,
            });
            if let Some(m) = &self.metrics {
                metrics::record_withdrawal(m, &node.to_hex(), amount, receipt.new_balance);
            }
            Ok(receipt)
        });

        match outcome {
            Ok(receipt) => {
                info!(
                    node = %node,
                    amount = %receipt.amount,
                    new_balance = %receipt.new_balance,
                    block = receipt.block,
                    "Withdrawal accepted"
                );
                self.refresh_totals();
                Ok(receipt)
            }
            Err(err) => Err(self.reject(Operation::Withdraw, node, Some(caller), decided_at, err)),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Staked balance of a node (zero for unknown nodes)
    pub fn balance_of(&self, node: &NodeId) -> Amount {
        self.ledger.balance_of(node)
    }

    /// Copy of a node's ledger entry
    pub fn node_account(&self, node: &NodeId) -> Option<NodeAccount> {
        self.ledger.account(node)
    }

    /// Derived staking state at the current block
    pub fn node_state(&self, node: &NodeId) -> Result<NodeState> {
        let account = self.account_or_unknown(node)?;
        if account.staked_balance() == 0 {
            return Ok(NodeState::Unstaked);
        }

        let settings = self.settings.snapshot().settings;
        let remaining_blocks = account
            .cooldown()
            .blocks_remaining(self.clock.current_block(), settings.cooldown_interval_blocks);

        if remaining_blocks > 0 {
            Ok(NodeState::CooldownActive { remaining_blocks })
        } else {
            Ok(NodeState::Staked)
        }
    }

    /// Minimum stake the node must keep for its active minipools
    pub fn required_collateral(&self, node: &NodeId) -> Result<Amount> {
        let account = self.account_or_unknown(node)?;
        let settings = self.settings.snapshot().settings;
        CollateralEvaluator::new(&settings).required_collateral(account.active_minipools())
    }

    /// Stake still needed before `additional_minipools` more can be launched
    pub fn collateral_shortfall(&self, node: &NodeId, additional_minipools: u64) -> Result<Amount> {
        let account = self.account_or_unknown(node)?;
        let minipools = account
            .active_minipools()
            .checked_add(additional_minipools)
            .ok_or_else(|| StakingError::overflow("collateral_shortfall"))?;

        let settings = self.settings.snapshot().settings;
        CollateralEvaluator::new(&settings).shortfall(account.staked_balance(), minipools)
    }

    /// Amount that a withdrawal at the current block could take out
    pub fn withdrawable_amount(&self, node: &NodeId) -> Result<Amount> {
        let account = self.account_or_unknown(node)?;
        let settings = self.settings.snapshot().settings;

        if !account
            .cooldown()
            .is_withdraw_eligible(self.clock.current_block(), settings.cooldown_interval_blocks)
        {
            return Ok(0);
        }

        CollateralEvaluator::new(&settings).withdrawable(account.staked_balance(), account.active_minipools())
    }

    /// Ledger records of a node, oldest first
    pub fn stake_history(&self, node: &NodeId) -> Vec<StakeRecord> {
        self.ledger.records(node)
    }

    /// Engine-wide statistics
    pub fn statistics(&self) -> StakingStatistics {
        let totals = self.ledger.totals();
        let accounts = self.ledger.export();
        StakingStatistics {
            total_staked: totals.total_staked,
            active_nodes: totals.active_nodes,
            staked_nodes: accounts.iter().filter(|a| a.staked_balance() > 0).count(),
            active_minipools: accounts.iter().map(|a| a.active_minipools()).sum(),
            total_records: accounts.iter().map(|a| a.records().len()).sum(),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            block: self.clock.current_block(),
            settings_version: self.settings.version(),
            accounts: self.ledger.export(),
        }
    }

    /// Replace the ledger contents with a snapshot's accounts
    pub fn restore(&self, snapshot: EngineSnapshot) -> Result<()> {
        let count = snapshot.accounts.len();
        self.ledger.import(snapshot.accounts)?;
        info!(accounts = count, block = snapshot.block, "Ledger restored from snapshot");

        if let Some(m) = &self.metrics {
            for account in self.ledger.export() {
                let label = account.node().to_hex();
                m.stake_per_node
                    .with_label_values(&[label.as_str()])
                    .set(nodestake_core::units::to_ether_f64(account.staked_balance()));
                metrics::update_node_minipools(m, &label, account.active_minipools());
            }
        }
        self.refresh_totals();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn account_or_unknown(&self, node: &NodeId) -> Result<NodeAccount> {
        self.ledger
            .account(node)
            .ok_or(StakingError::UnknownNode(*node))
    }

    /// Log, publish and count a rejection, handing the error back.
    ///
    /// `block` is the height the decision was made at; requests rejected
    /// before reading the clock report the current height.
    fn reject(
        &self,
        operation: Operation,
        node: NodeId,
        caller: Option<Address>,
        block: Option<BlockNumber>,
        err: StakingError,
    ) -> StakingError {
        let kind = err.kind();
        let block = block.unwrap_or_else(|| self.clock.current_block());
        warn!(node = %node, operation = %operation, kind = %kind, block, "Request rejected: {}", err);

        self.events.publish(StakingEvent::Rejected {
            node,
            caller,
            operation,
            kind,
            block,
        });
        if let Some(m) = &self.metrics {
            metrics::record_rejection(m, operation, kind);
        }
        err
    }

    /// Push ledger totals to the gauges; reads them under the totals lock
    /// so the last writer always sets the latest values
    fn refresh_totals(&self) {
        if let Some(m) = &self.metrics {
            self.ledger.with_totals(|totals| {
                metrics::update_stake_totals(m, totals.total_staked, totals.active_nodes)
            });
        }
    }
}

fn authorize(account: &NodeAccount, caller: &Address) -> Result<()> {
    if account.is_authorized(caller) {
        Ok(())
    } else {
        Err(StakingError::Unauthorized {
            caller: *caller,
            node: account.node(),
        })
    }
}

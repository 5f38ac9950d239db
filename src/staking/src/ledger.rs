//! Per-node stake ledger
//!
//! The ledger is the only owner of node entries. It stores balances and
//! the append-only record log, and it knows nothing about cooldowns being
//! enforced or collateral floors: those checks belong to the engine, which
//! runs them through [`Ledger::with_account`] under the same entry lock as
//! the mutation they guard.
//!
//! Account mutators check everything first and mutate last, so an `Err`
//! leaves the account untouched.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nodestake_core::{units, Address, Amount, BlockNumber, NodeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cooldown::CooldownTracker;
use crate::error::{Result, StakingError};
use crate::types::{NodeStatus, StakeDirection, StakeRecord};

/// Domain separator for node contract address derivation
const NODE_CONTRACT_SEED: &[u8] = b"nodestake/node-contract";

/// Ledger entry for one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAccount {
    node: NodeId,
    node_contract: Option<Address>,
    status: NodeStatus,
    #[serde(with = "units::amount_string")]
    staked_balance: Amount,
    cooldown: CooldownTracker,
    active_minipools: u64,
    registered_at: BlockNumber,
    records: Vec<StakeRecord>,
}

impl NodeAccount {
    fn new(operator: Address, at: BlockNumber) -> Self {
        Self {
            node: operator,
            node_contract: None,
            status: NodeStatus::Active,
            staked_balance: 0,
            cooldown: CooldownTracker::new(),
            active_minipools: 0,
            registered_at: at,
            records: Vec::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The registered operator (the node is identified by its operator)
    pub fn operator(&self) -> Address {
        self.node
    }

    pub fn node_contract(&self) -> Option<Address> {
        self.node_contract
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    pub fn staked_balance(&self) -> Amount {
        self.staked_balance
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn active_minipools(&self) -> u64 {
        self.active_minipools
    }

    pub fn registered_at(&self) -> BlockNumber {
        self.registered_at
    }

    pub fn records(&self) -> &[StakeRecord] {
        &self.records
    }

    /// Whether `caller` may stake or withdraw for this node
    pub fn is_authorized(&self, caller: &Address) -> bool {
        *caller == self.node || self.node_contract.as_ref() == Some(caller)
    }

    /// Add `amount` to the balance and restart the cooldown window.
    ///
    /// Returns the appended record.
    pub fn stake(&mut self, amount: Amount, at: BlockNumber) -> Result<&StakeRecord> {
        if amount == 0 {
            return Err(StakingError::InvalidAmount { amount });
        }

        let new_balance = self
            .staked_balance
            .checked_add(amount)
            .ok_or_else(|| StakingError::overflow("stake"))?;

        self.staked_balance = new_balance;
        self.cooldown.record_stake(at);
        Ok(self.append_record(amount, StakeDirection::Stake, at))
    }

    /// Remove `amount` from the balance.
    ///
    /// Only checks the balance itself; cooldown and collateral are the
    /// caller's responsibility.
    pub fn withdraw(&mut self, amount: Amount, at: BlockNumber) -> Result<&StakeRecord> {
        if amount == 0 {
            return Err(StakingError::InvalidAmount { amount });
        }

        let new_balance = self
            .staked_balance
            .checked_sub(amount)
            .ok_or(StakingError::InsufficientStake {
                available: self.staked_balance,
                requested: amount,
            })?;

        self.staked_balance = new_balance;
        Ok(self.append_record(amount, StakeDirection::Withdraw, at))
    }

    /// Apply a signed change to the active minipool count
    pub fn adjust_minipools(&mut self, delta: i64) -> Result<u64> {
        let updated = if delta >= 0 {
            self.active_minipools
                .checked_add(delta.unsigned_abs())
                .ok_or_else(|| StakingError::overflow("minipool_count"))?
        } else {
            self.active_minipools
                .checked_sub(delta.unsigned_abs())
                .ok_or(StakingError::MinipoolCountUnderflow {
                    node: self.node,
                    active: self.active_minipools,
                    delta,
                })?
        };

        self.active_minipools = updated;
        Ok(updated)
    }

    /// Create the node's delegated contract address
    pub fn create_node_contract(&mut self) -> Result<Address> {
        if let Some(contract) = self.node_contract {
            return Err(StakingError::NodeContractExists {
                node: self.node,
                contract,
            });
        }

        let mut seed = Vec::with_capacity(NODE_CONTRACT_SEED.len() + self.node.as_bytes().len());
        seed.extend_from_slice(NODE_CONTRACT_SEED);
        seed.extend_from_slice(self.node.as_bytes());
        let contract = Address::derive(&seed);

        self.node_contract = Some(contract);
        Ok(contract)
    }

    /// Mark the entry deregistered; requires an empty balance and no minipools
    pub fn deregister(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(StakingError::UnknownNode(self.node));
        }

        if self.staked_balance > 0 || self.active_minipools > 0 {
            return Err(StakingError::NodeStillActive {
                node: self.node,
                balance: self.staked_balance,
                active_minipools: self.active_minipools,
            });
        }

        self.status = NodeStatus::Deregistered;
        Ok(())
    }

    fn append_record(&mut self, amount: Amount, direction: StakeDirection, at: BlockNumber) -> &StakeRecord {
        self.records.push(StakeRecord {
            id: Uuid::new_v4(),
            node: self.node,
            amount,
            direction,
            block: at,
            balance_after: self.staked_balance,
            recorded_at: Utc::now(),
        });
        &self.records[self.records.len() - 1]
    }

    /// Balance implied by replaying the record log
    fn replayed_balance(&self) -> Option<Amount> {
        self.records.iter().try_fold(0 as Amount, |balance, record| match record.direction {
            StakeDirection::Stake => balance.checked_add(record.amount),
            StakeDirection::Withdraw => balance.checked_sub(record.amount),
        })
    }
}

/// Aggregates kept alongside the entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    pub total_staked: Amount,
    pub active_nodes: usize,
}

impl LedgerTotals {
    fn of<'a>(accounts: impl Iterator<Item = &'a NodeAccount>) -> Self {
        accounts.fold(Self::default(), |mut totals, account| {
            totals.total_staked = totals.total_staked.saturating_add(account.staked_balance);
            totals.active_nodes += account.is_active() as usize;
            totals
        })
    }

    /// Replace one entry's contribution
    fn replace(&mut self, before: (Amount, bool), after: (Amount, bool)) {
        self.total_staked = self
            .total_staked
            .saturating_sub(before.0)
            .saturating_add(after.0);
        self.active_nodes = (self.active_nodes + after.1 as usize).saturating_sub(before.1 as usize);
    }
}

/// Thread-safe balance store keyed by node.
///
/// Each entry is guarded by its DashMap shard lock, so operations on one
/// node are serialized while other nodes proceed in parallel. Totals are
/// adjusted while the entry lock is still held; lock order is always
/// entry, then totals.
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: DashMap<NodeId, NodeAccount>,
    totals: Mutex<LedgerTotals>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node entry for `operator`, or reactivate a deregistered one
    pub fn register(&self, operator: Address, at: BlockNumber) -> Result<()> {
        match self.accounts.entry(operator) {
            Entry::Occupied(mut entry) => {
                let account = entry.get_mut();
                if account.is_active() {
                    return Err(StakingError::NodeAlreadyRegistered(operator));
                }
                account.status = NodeStatus::Active;
                account.registered_at = at;
                self.totals.lock().active_nodes += 1;
            }
            Entry::Vacant(entry) => {
                entry.insert(NodeAccount::new(operator, at));
                self.totals.lock().active_nodes += 1;
            }
        }
        Ok(())
    }

    /// Run `f` against an active node's entry while holding its lock.
    ///
    /// `f` must not call back into the ledger.
    pub fn with_account<R, F>(&self, node: &NodeId, f: F) -> Result<R>
    where
        F: FnOnce(&mut NodeAccount) -> Result<R>,
    {
        let mut account = self
            .accounts
            .get_mut(node)
            .ok_or(StakingError::UnknownNode(*node))?;

        if !account.is_active() {
            return Err(StakingError::UnknownNode(*node));
        }

        let before = (account.staked_balance, account.is_active());
        let outcome = f(account.value_mut());
        let after = (account.staked_balance, account.is_active());
        if before != after {
            self.totals.lock().replace(before, after);
        }
        outcome
    }

    /// Increase a node's balance, returning the new balance
    pub fn stake(&self, node: &NodeId, amount: Amount, at: BlockNumber) -> Result<Amount> {
        self.with_account(node, |account| account.stake(amount, at).map(|r| r.balance_after))
    }

    /// Decrease a node's balance, returning the new balance
    pub fn withdraw(&self, node: &NodeId, amount: Amount, at: BlockNumber) -> Result<Amount> {
        self.with_account(node, |account| account.withdraw(amount, at).map(|r| r.balance_after))
    }

    /// Staked balance of a node (zero for unknown nodes)
    pub fn balance_of(&self, node: &NodeId) -> Amount {
        self.accounts
            .get(node)
            .map(|account| account.staked_balance)
            .unwrap_or(0)
    }

    /// Copy of a node entry, including deregistered ones
    pub fn account(&self, node: &NodeId) -> Option<NodeAccount> {
        self.accounts.get(node).map(|account| account.clone())
    }

    /// Record log of a node, oldest first
    pub fn records(&self, node: &NodeId) -> Vec<StakeRecord> {
        self.accounts
            .get(node)
            .map(|account| account.records.clone())
            .unwrap_or_default()
    }

    /// Sum of all balances
    pub fn total_staked(&self) -> Amount {
        self.totals.lock().total_staked
    }

    pub fn totals(&self) -> LedgerTotals {
        *self.totals.lock()
    }

    /// Run `f` with the totals locked, so readers observe them in commit order
    pub fn with_totals<R>(&self, f: impl FnOnce(&LedgerTotals) -> R) -> R {
        f(&self.totals.lock())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Copies of every entry, ordered by node for stable output
    pub fn export(&self) -> Vec<NodeAccount> {
        let mut accounts: Vec<NodeAccount> = self
            .accounts
            .iter()
            .map(|account| account.value().clone())
            .collect();
        accounts.sort_by_key(|account| account.node);
        accounts
    }

    /// Replace all entries with `accounts`.
    ///
    /// Rejects duplicates and entries whose balance disagrees with their
    /// record log; on rejection the current entries are kept.
    pub fn import(&self, accounts: Vec<NodeAccount>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for account in &accounts {
            if !seen.insert(account.node) {
                return Err(StakingError::InvalidSnapshot(format!(
                    "duplicate entry for node {}",
                    account.node
                )));
            }
            if account.replayed_balance() != Some(account.staked_balance) {
                return Err(StakingError::InvalidSnapshot(format!(
                    "balance of node {} does not match its records",
                    account.node
                )));
            }
        }

        let totals = LedgerTotals::of(accounts.iter());
        self.accounts.clear();
        for account in accounts {
            self.accounts.insert(account.node, account);
        }
        *self.totals.lock() = totals;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_node(label: &str) -> NodeId {
        Address::from_label(label)
    }

    #[test]
    fn test_stake_updates_balance_record_and_cooldown() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();

        assert_eq!(ledger.stake(&node, 1000, 5).unwrap(), 1000);
        assert_eq!(ledger.stake(&node, 500, 8).unwrap(), 1500);
        assert_eq!(ledger.balance_of(&node), 1500);

        let account = ledger.account(&node).unwrap();
        assert_eq!(account.cooldown().last_stake_block(), Some(8));

        let records = ledger.records(&node);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].direction, StakeDirection::Stake);
        assert_eq!(records[1].balance_after, 1500);
    }

    #[test]
    fn test_withdraw_validation() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        ledger.stake(&node, 1000, 2).unwrap();

        let result = ledger.withdraw(&node, 2000, 3);
        assert!(matches!(
            result,
            Err(StakingError::InsufficientStake { available: 1000, requested: 2000 })
        ));

        let result = ledger.withdraw(&node, 0, 3);
        assert!(matches!(result, Err(StakingError::InvalidAmount { .. })));

        assert_eq!(ledger.withdraw(&node, 1000, 3).unwrap(), 0);
        assert_eq!(ledger.records(&node).len(), 2);
    }

    #[test]
    fn test_withdraw_does_not_touch_cooldown() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        ledger.stake(&node, 1000, 2).unwrap();
        ledger.withdraw(&node, 10, 9).unwrap();

        let account = ledger.account(&node).unwrap();
        assert_eq!(account.cooldown().last_stake_block(), Some(2));
    }

    #[test]
    fn test_stake_overflow_leaves_state() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        ledger.stake(&node, Amount::MAX, 2).unwrap();

        let result = ledger.stake(&node, 1, 3);
        assert!(matches!(result, Err(StakingError::ArithmeticOverflow { .. })));
        assert_eq!(ledger.balance_of(&node), Amount::MAX);
        assert_eq!(ledger.records(&node).len(), 1);
        assert_eq!(ledger.account(&node).unwrap().cooldown().last_stake_block(), Some(2));
    }

    #[test]
    fn test_unknown_node() {
        let ledger = Ledger::new();
        let node = create_test_node("ghost");

        assert!(matches!(ledger.stake(&node, 1, 1), Err(StakingError::UnknownNode(_))));
        assert_eq!(ledger.balance_of(&node), 0);
        assert!(ledger.records(&node).is_empty());
    }

    #[test]
    fn test_register_twice_and_reactivate() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        assert!(matches!(
            ledger.register(node, 2),
            Err(StakingError::NodeAlreadyRegistered(_))
        ));

        ledger.stake(&node, 100, 3).unwrap();
        ledger.withdraw(&node, 100, 4).unwrap();
        ledger.with_account(&node, |account| account.deregister()).unwrap();
        assert!(matches!(ledger.stake(&node, 1, 5), Err(StakingError::UnknownNode(_))));

        ledger.register(node, 6).unwrap();
        assert_eq!(ledger.records(&node).len(), 2);
        assert_eq!(ledger.account(&node).unwrap().registered_at(), 6);
    }

    #[test]
    fn test_deregister_requires_empty_node() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        ledger.stake(&node, 100, 2).unwrap();

        let result = ledger.with_account(&node, |account| account.deregister());
        assert!(matches!(result, Err(StakingError::NodeStillActive { balance: 100, .. })));

        ledger.withdraw(&node, 100, 3).unwrap();
        ledger.with_account(&node, |account| account.adjust_minipools(1)).unwrap();
        let result = ledger.with_account(&node, |account| account.deregister());
        assert!(matches!(result, Err(StakingError::NodeStillActive { active_minipools: 1, .. })));
    }

    #[test]
    fn test_minipool_adjustment() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();

        assert_eq!(ledger.with_account(&node, |a| a.adjust_minipools(3)).unwrap(), 3);
        assert_eq!(ledger.with_account(&node, |a| a.adjust_minipools(-2)).unwrap(), 1);

        let result = ledger.with_account(&node, |a| a.adjust_minipools(-2));
        assert!(matches!(result, Err(StakingError::MinipoolCountUnderflow { active: 1, delta: -2, .. })));
        assert_eq!(ledger.account(&node).unwrap().active_minipools(), 1);
    }

    #[test]
    fn test_node_contract_authorization() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        let random = create_test_node("random");
        ledger.register(node, 1).unwrap();

        let contract = ledger.with_account(&node, |a| a.create_node_contract()).unwrap();
        let account = ledger.account(&node).unwrap();
        assert!(account.is_authorized(&node));
        assert!(account.is_authorized(&contract));
        assert!(!account.is_authorized(&random));

        let result = ledger.with_account(&node, |a| a.create_node_contract());
        assert!(matches!(result, Err(StakingError::NodeContractExists { .. })));
    }

    #[test]
    fn test_export_import() {
        let ledger = Ledger::new();
        let node1 = create_test_node("node1");
        let node2 = create_test_node("node2");
        ledger.register(node1, 1).unwrap();
        ledger.register(node2, 1).unwrap();
        ledger.stake(&node1, 700, 2).unwrap();
        ledger.withdraw(&node1, 200, 3).unwrap();

        let exported = ledger.export();
        let json = serde_json::to_string(&exported).unwrap();
        let restored: Vec<NodeAccount> = serde_json::from_str(&json).unwrap();

        let other = Ledger::new();
        other.import(restored).unwrap();
        assert_eq!(other.balance_of(&node1), 500);
        assert_eq!(other.len(), 2);
        assert_eq!(other.total_staked(), 500);
    }

    #[test]
    fn test_totals_follow_every_mutation() {
        let ledger = Ledger::new();
        let node1 = create_test_node("node1");
        let node2 = create_test_node("node2");
        let recount = |ledger: &Ledger| LedgerTotals::of(ledger.export().iter());

        ledger.register(node1, 1).unwrap();
        ledger.register(node2, 1).unwrap();
        ledger.stake(&node1, 700, 2).unwrap();
        ledger.stake(&node2, 300, 2).unwrap();
        ledger.withdraw(&node1, 200, 3).unwrap();
        assert!(ledger.withdraw(&node2, 301, 3).is_err());
        assert_eq!(ledger.totals(), LedgerTotals { total_staked: 800, active_nodes: 2 });
        assert_eq!(ledger.totals(), recount(&ledger));

        ledger.withdraw(&node2, 300, 4).unwrap();
        ledger.with_account(&node2, |a| a.deregister()).unwrap();
        assert_eq!(ledger.totals(), LedgerTotals { total_staked: 500, active_nodes: 1 });

        ledger.register(node2, 5).unwrap();
        assert_eq!(ledger.totals().active_nodes, 2);
        assert_eq!(ledger.totals(), recount(&ledger));

        let other = Ledger::new();
        other.import(ledger.export()).unwrap();
        assert_eq!(other.totals(), ledger.totals());
    }

    #[test]
    fn test_totals_under_concurrent_stakes() {
        let ledger = Ledger::new();
        let nodes: Vec<NodeId> = (0..4).map(|i| create_test_node(&format!("node{}", i))).collect();
        for node in &nodes {
            ledger.register(*node, 1).unwrap();
        }

        std::thread::scope(|scope| {
            for node in &nodes {
                let ledger = &ledger;
                scope.spawn(move || {
                    for _ in 0..250 {
                        ledger.stake(node, 2, 2).unwrap();
                        ledger.withdraw(node, 1, 2).unwrap();
                    }
                });
            }
        });

        assert_eq!(ledger.total_staked(), 1000);
        assert_eq!(ledger.totals(), LedgerTotals::of(ledger.export().iter()));
    }

    #[test]
    fn test_import_rejects_tampered_balance() {
        let ledger = Ledger::new();
        let node = create_test_node("node");
        ledger.register(node, 1).unwrap();
        ledger.stake(&node, 700, 2).unwrap();

        let mut exported = ledger.export();
        exported[0].staked_balance = 10_000;

        let other = Ledger::new();
        assert!(matches!(other.import(exported), Err(StakingError::InvalidSnapshot(_))));
        assert!(other.is_empty());
    }
}

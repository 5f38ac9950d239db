//! Outbound staking events
//!
//! Every accepted or rejected request produces one typed event on a
//! broadcast channel. Subscribers that fall behind lose the oldest events
//! (`RecvError::Lagged`); publishing never blocks the engine.

use nodestake_core::{units, Address, Amount, BlockNumber, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::types::Operation;

/// Default broadcast buffer per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event emitted by the staking engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StakingEvent {
    NodeRegistered {
        node: NodeId,
        block: BlockNumber,
    },

    NodeContractCreated {
        node: NodeId,
        contract: Address,
        block: BlockNumber,
    },

    NodeDeregistered {
        node: NodeId,
        block: BlockNumber,
    },

    MinipoolCountChanged {
        node: NodeId,
        delta: i64,
        active_minipools: u64,
        block: BlockNumber,
    },

    StakeAccepted {
        node: NodeId,
        #[serde(with = "units::amount_string")]
        amount: Amount,
        #[serde(with = "units::amount_string")]
        new_balance: Amount,
        block: BlockNumber,
    },

    WithdrawAccepted {
        node: NodeId,
        #[serde(with = "units::amount_string")]
        amount: Amount,
        #[serde(with = "units::amount_string")]
        new_balance: Amount,
        block: BlockNumber,
    },

    /// A request failed; `kind` names the exact reason
    Rejected {
        node: NodeId,
        caller: Option<Address>,
        operation: Operation,
        kind: ErrorKind,
        block: BlockNumber,
    },
}

impl StakingEvent {
    pub fn node(&self) -> NodeId {
        match self {
            StakingEvent::NodeRegistered { node, .. }
            | StakingEvent::NodeContractCreated { node, .. }
            | StakingEvent::NodeDeregistered { node, .. }
            | StakingEvent::MinipoolCountChanged { node, .. }
            | StakingEvent::StakeAccepted { node, .. }
            | StakingEvent::WithdrawAccepted { node, .. }
            | StakingEvent::Rejected { node, .. } => *node,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, StakingEvent::Rejected { .. })
    }
}

/// Broadcast fan-out for [`StakingEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StakingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StakingEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers, returning how many received it
    pub fn publish(&self, event: StakingEvent) -> usize {
        // No subscribers is not an error for the engine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let node = Address::from_label("node");
        assert_eq!(bus.publish(StakingEvent::NodeRegistered { node, block: 1 }), 0);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let node = Address::from_label("node");

        bus.publish(StakingEvent::NodeRegistered { node, block: 1 });
        bus.publish(StakingEvent::Rejected {
            node,
            caller: Some(Address::from_label("random")),
            operation: Operation::Stake,
            kind: ErrorKind::Unauthorized,
            block: 2,
        });

        assert!(matches!(rx.try_recv().unwrap(), StakingEvent::NodeRegistered { block: 1, .. }));
        let rejected = rx.try_recv().unwrap();
        assert!(rejected.is_rejection());
        assert_eq!(rejected.node(), node);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let node = Address::from_label("node");
        let event = StakingEvent::StakeAccepted {
            node,
            amount: 10,
            new_balance: 10,
            block: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "StakeAccepted");
        assert_eq!(json["amount"], "10");
    }
}
